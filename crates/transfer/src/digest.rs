//! Content digest helpers.
//!
//! The platform's digest algorithm is backend-specific; this module
//! isolates it so the rest of the engine treats digests as opaque hex
//! strings.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;

/// Computes the digest of `data` and returns it hex-encoded.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes the digest of an entire file, streaming in 8 KiB blocks.
pub fn digest_file(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
