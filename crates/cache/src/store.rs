use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use granary_protocol::FileIdentity;

use crate::CacheError;

const CONTENT_FILE: &str = "content";
const ENTRY_FILE: &str = "entry.json";
const STAGING_DIR: &str = "staging";

/// A committed cache entry pointing at verified content on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub identity: FileIdentity,
    /// Path of the cached content file.
    pub path: PathBuf,
}

/// Content-addressed file cache rooted at a single directory.
///
/// Entries live at `root/<digest[..2]>/<digest>/` with the content bytes
/// and a small JSON record of the identity. The digest is the key: the
/// same remote handle under a different digest is a distinct entry, so a
/// newer version never silently overwrites an older one.
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Opens (creating if needed) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the committed entry for `identity`, if present.
    ///
    /// A content file whose size does not match the identity is treated
    /// as a miss rather than an error.
    pub fn lookup(&self, identity: &FileIdentity) -> Result<Option<CacheEntry>, CacheError> {
        let content = self.entry_dir(identity)?.join(CONTENT_FILE);
        match fs::metadata(&content) {
            Ok(meta) if meta.len() == identity.size => Ok(Some(CacheEntry {
                identity: identity.clone(),
                path: content,
            })),
            Ok(meta) => {
                warn!(
                    digest = %identity.digest,
                    expected = identity.size,
                    actual = meta.len(),
                    "cached content size mismatch, treating as miss"
                );
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Commits verified content into the cache, copying from `source`.
    ///
    /// Must only be called after whole-file digest verification. The copy
    /// is staged under a private directory and renamed into place, so a
    /// concurrent [`lookup`](Self::lookup) never observes a half-written
    /// entry. If another caller commits the same identity first, the
    /// existing entry wins and the staged copy is discarded.
    pub fn commit(&self, identity: &FileIdentity, source: &Path) -> Result<CacheEntry, CacheError> {
        let final_dir = self.entry_dir(identity)?;
        if let Some(existing) = self.lookup(identity)? {
            return Ok(existing);
        }

        let staging = self
            .root
            .join(STAGING_DIR)
            .join(Uuid::new_v4().to_string());
        fs::create_dir_all(&staging)?;
        fs::copy(source, staging.join(CONTENT_FILE))?;
        let entry_json = serde_json::to_vec_pretty(identity)?;
        fs::write(staging.join(ENTRY_FILE), entry_json)?;

        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::rename(&staging, &final_dir) {
            Ok(()) => {
                debug!(digest = %identity.digest, handle = %identity.handle_id, "cache entry committed");
            }
            Err(e) => {
                // Lost a commit race: keep the winner's entry.
                let _ = fs::remove_dir_all(&staging);
                if self.lookup(identity)?.is_none() {
                    return Err(e.into());
                }
            }
        }

        Ok(CacheEntry {
            identity: identity.clone(),
            path: final_dir.join(CONTENT_FILE),
        })
    }

    /// Removes entries whose identity matches `predicate`. Returns the
    /// number of entries removed.
    pub fn purge<F>(&self, predicate: F) -> Result<usize, CacheError>
    where
        F: Fn(&FileIdentity) -> bool,
    {
        let mut removed = 0;
        for dir in self.entry_dirs()? {
            let entry_path = dir.join(ENTRY_FILE);
            let Ok(raw) = fs::read(&entry_path) else {
                continue;
            };
            let Ok(identity) = serde_json::from_slice::<FileIdentity>(&raw) else {
                continue;
            };
            if predicate(&identity) {
                fs::remove_dir_all(&dir)?;
                removed += 1;
            }
        }
        debug!(removed, "cache purge complete");
        Ok(removed)
    }

    /// Removes every entry in the cache.
    pub fn purge_all(&self) -> Result<usize, CacheError> {
        self.purge(|_| true)
    }

    /// Total size in bytes of all cached content files.
    pub fn size_bytes(&self) -> Result<u64, CacheError> {
        let mut total = 0;
        for dir in self.entry_dirs()? {
            if let Ok(meta) = fs::metadata(dir.join(CONTENT_FILE)) {
                total += meta.len();
            }
        }
        Ok(total)
    }

    fn entry_dir(&self, identity: &FileIdentity) -> Result<PathBuf, CacheError> {
        let digest = &identity.digest;
        if digest.len() < 3 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CacheError::InvalidDigest(digest.clone()));
        }
        Ok(self.root.join(&digest[..2]).join(digest))
    }

    fn entry_dirs(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut dirs = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if shard.file_name() == STAGING_DIR || !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    dirs.push(entry.path());
                }
            }
        }
        Ok(dirs)
    }
}
