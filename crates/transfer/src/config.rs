use std::path::PathBuf;
use std::time::Duration;

use crate::DEFAULT_CHUNK_SIZE;

/// Extra workers beyond available CPU parallelism. Chunk work is
/// I/O-bound, so a little headroom keeps connections saturated while a
/// few workers sit in backoff sleeps.
const WORKER_HEADROOM: usize = 2;

/// Default concurrency ceiling: available parallelism plus headroom.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        + WORKER_HEADROOM
}

/// Retry behavior for chunk operations and the finalize call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts per operation, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

/// Storage-backend part size limits used when clamping a chunk plan.
#[derive(Debug, Clone, Copy)]
pub struct PartLimits {
    pub min_part_size: u64,
    pub max_part_size: u64,
    /// Hard cap on part count; the chunk size grows to fit if needed.
    pub max_parts: u32,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: 5 * 1024 * 1024,
            max_part_size: 5 * 1024 * 1024 * 1024,
            max_parts: 10_000,
        }
    }
}

/// Configuration for a [`TransferScheduler`](crate::TransferScheduler).
///
/// All knobs are explicit; the engine never reads the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Requested chunk size in bytes, clamped by `part_limits`.
    pub chunk_size: u64,
    pub part_limits: PartLimits,
    /// Size of the shared chunk worker pool.
    pub max_workers: usize,
    pub retry: RetryConfig,
    /// Root directory of the content-addressed download cache.
    pub cache_root: PathBuf,
    /// Directory holding persisted session state for resume.
    pub state_dir: PathBuf,
    /// Per-HTTP-request timeout.
    pub request_timeout: Duration,
    /// Minimum interval between aggregate progress notifications.
    pub progress_interval: Duration,
}

impl EngineConfig {
    /// Creates a config with defaults for everything except the two
    /// required directories.
    pub fn new(cache_root: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            part_limits: PartLimits::default(),
            max_workers: default_worker_count(),
            retry: RetryConfig::default(),
            cache_root: cache_root.into(),
            state_dir: state_dir.into(),
            request_timeout: Duration::from_secs(60),
            progress_interval: Duration::from_millis(500),
        }
    }
}
