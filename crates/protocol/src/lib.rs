//! Shared types for the Granary platform client.
//!
//! Plain data structures that cross crate boundaries: file identities,
//! transfer directions and statuses, signed URLs, multipart finalize
//! payloads, and progress snapshots. No I/O lives here.

pub mod messages;
pub mod types;

pub use messages::{CompletedPart, FinalizeRequest};
pub use types::{
    FileIdentity, FileProgress, ProgressSnapshot, SignedUrl, TransferDirection, TransferStatus,
};
