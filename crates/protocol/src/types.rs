use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logical identity of file content being transferred, independent of
/// where it currently lives locally.
///
/// The digest is an opaque hex string; the transfer engine computes and
/// compares it but never interprets it beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdentity {
    /// Remote content handle ID assigned by the platform.
    pub handle_id: String,
    /// Expected content digest (hex-encoded).
    pub digest: String,
    /// Total content size in bytes.
    pub size: u64,
}

impl FileIdentity {
    /// Creates a new identity.
    pub fn new(handle_id: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            handle_id: handle_id.into(),
            digest: digest.into(),
            size,
        }
    }
}

/// Direction of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Lifecycle status of a transfer session.
///
/// Transitions: `Pending -> InProgress -> {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    /// Returns `true` for the three terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A short-lived pre-authorized URL for one storage operation.
///
/// Issued by the platform's signed-URL provider; the engine attaches the
/// given headers verbatim and never refreshes an expired URL itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    /// HTTP method the URL is authorized for ("GET" or "PUT").
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl SignedUrl {
    /// A signed GET URL with no extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".into(),
            headers: HashMap::new(),
        }
    }

    /// A signed PUT URL with no extra headers.
    pub fn put(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "PUT".into(),
            headers: HashMap::new(),
        }
    }
}

/// Byte-level progress for one file, including its session status so a
/// subscriber sees per-file failures without holding transfer handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub handle_id: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub status: TransferStatus,
    /// Failure description when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rate-limited aggregate progress across all files in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub files: Vec<FileProgress>,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Sliding-window throughput in bytes per second.
    pub bytes_per_second: f64,
    /// Estimated time remaining, if throughput is nonzero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<Duration>,
}
