//! Concurrent, resumable chunked file transfer engine.
//!
//! Moves file content between local disk and a storage backend reachable
//! only through short-lived signed URLs and chunk-oriented multipart
//! APIs. Files are split into a deterministic chunk plan, chunks are
//! transferred by a bounded worker pool shared across all in-flight
//! files, per-chunk completion is persisted so an interrupted transfer
//! resumes without re-transferring finished chunks, and verified
//! downloads land in a content-addressed local cache.

mod backend;
mod config;
mod digest;
mod plan;
mod progress;
mod retry;
mod scheduler;
mod session;
mod worker;

pub use backend::{ChunkTransport, HttpTransport, SignedUrlProvider};
pub use config::{EngineConfig, PartLimits, RetryConfig, default_worker_count};
pub use digest::{digest_bytes, digest_file};
pub use plan::{ChunkDescriptor, effective_chunk_size, plan};
pub use progress::{ProgressCallback, ProgressReporter, SpeedCalculator};
pub use retry::{ErrorClass, RetryPolicy};
pub use scheduler::{TransferHandle, TransferRequest, TransferScheduler};
pub use session::TransferSession;

use std::time::Duration;

/// Default chunk size: 8 MiB.
///
/// Large enough to keep per-chunk overhead (signed-URL issue, HTTP
/// round-trip, digest work) small, well above the backend's minimum
/// part size.
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend rejection carrying the HTTP status. 5xx is retryable,
    /// other statuses are fatal.
    #[error("backend error {status}: {body}")]
    Status { status: u16, body: String },

    /// Signed URL expired or was revoked (403/410). Fatal to the chunk
    /// attempt; the caller resolves it by re-requesting a fresh URL.
    #[error("authorization expired (HTTP {status})")]
    AuthExpired { status: u16 },

    /// 429 from the backend, with the server's `Retry-After` hint if
    /// one was present.
    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("chunk {index} length mismatch: expected {expected} bytes, got {actual}")]
    ChunkLengthMismatch {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("upload part response missing ETag header")]
    MissingEtag,

    #[error("retries exhausted after {attempts} attempts: {last}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session conflict: {0}")]
    SessionConflict(String),

    #[error("cache error: {0}")]
    Cache(#[from] granary_cache::CacheError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
