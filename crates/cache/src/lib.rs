//! Content-addressed on-disk cache for verified downloads.
//!
//! Maps a [`FileIdentity`](granary_protocol::FileIdentity) to a cached
//! local file. Entries are committed only after whole-file digest
//! verification and appear atomically: a concurrent lookup sees either
//! nothing or a fully committed entry, never a partial write.

mod store;

pub use store::{CacheEntry, FileCache};

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}
