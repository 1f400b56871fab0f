//! Per-file transfer session: chunk completion tracking and resume state.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use granary_protocol::{CompletedPart, FileIdentity, FileProgress, TransferDirection, TransferStatus};

use crate::config::PartLimits;
use crate::digest::digest_bytes;
use crate::plan::{ChunkDescriptor, plan};
use crate::{TransferError, plan as plan_mod};

/// Extension appended to the destination path for staged download bytes.
/// The destination itself only materializes by renaming the verified
/// staging file.
const PARTIAL_SUFFIX: &str = "partial";

/// On-disk resume record. Chunk descriptors are not stored: the plan is
/// deterministic, so reload recomputes it from the persisted chunk size
/// and reconciles the completed indices against it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    identity: FileIdentity,
    direction: TransferDirection,
    local_path: PathBuf,
    chunk_size: u64,
    completed: Vec<u32>,
    #[serde(default)]
    etags: HashMap<u32, String>,
    status: TransferStatus,
}

/// Tracks one file transfer: which chunks are done, aggregate bytes, and
/// the lifecycle status (thread-safe).
///
/// Mutations happen under a write lock that is only ever held for the
/// in-memory update and the state-file write, never across an await
/// point.
pub struct TransferSession {
    state_path: PathBuf,
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    identity: FileIdentity,
    direction: TransferDirection,
    local_path: PathBuf,
    chunk_size: u64,
    chunks: Vec<ChunkDescriptor>,
    completed: BTreeSet<u32>,
    etags: HashMap<u32, String>,
    status: TransferStatus,
    transferred_bytes: u64,
    error: Option<String>,
}

impl TransferSession {
    /// Loads a persisted session for (identity, local path) or creates a
    /// fresh one.
    ///
    /// A persisted record whose identity, direction, or path no longer
    /// matches is discarded. A resumed session keeps its original chunk
    /// size even if the configured one changed, so completed indices
    /// stay valid, and never re-transfers a chunk already recorded
    /// complete.
    pub fn load_or_create(
        state_dir: &Path,
        identity: FileIdentity,
        direction: TransferDirection,
        local_path: PathBuf,
        chunk_size: u64,
        limits: &PartLimits,
    ) -> Result<Self, TransferError> {
        fs::create_dir_all(state_dir)?;
        let state_path = state_dir.join(format!(
            "{}.json",
            session_key(&identity, &local_path)
        ));

        let mut effective_chunk_size = plan_mod::effective_chunk_size(identity.size, chunk_size, limits);
        let mut completed = BTreeSet::new();
        let mut etags = HashMap::new();

        if let Ok(raw) = fs::read(&state_path) {
            match serde_json::from_slice::<PersistedSession>(&raw) {
                Ok(saved)
                    if saved.identity == identity
                        && saved.direction == direction
                        && saved.local_path == local_path =>
                {
                    effective_chunk_size = saved.chunk_size;
                    completed = saved.completed.into_iter().collect();
                    etags = saved.etags;
                    debug!(
                        handle = %identity.handle_id,
                        completed = completed.len(),
                        "resuming persisted session"
                    );
                }
                Ok(_) => {
                    debug!(handle = %identity.handle_id, "discarding stale session state");
                    let _ = fs::remove_file(&state_path);
                }
                Err(e) => {
                    warn!(error = %e, "unreadable session state, starting fresh");
                    let _ = fs::remove_file(&state_path);
                }
            }
        }

        let chunks = plan(identity.size, effective_chunk_size, limits);
        // Reconcile: drop any persisted index the recomputed plan doesn't have.
        let max_index = chunks.len() as u32;
        completed.retain(|i| *i >= 1 && *i <= max_index);
        etags.retain(|i, _| completed.contains(i));
        let transferred_bytes = chunks
            .iter()
            .filter(|c| completed.contains(&c.index))
            .map(|c| c.length)
            .sum();

        Ok(Self {
            state_path,
            inner: RwLock::new(SessionInner {
                identity,
                direction,
                local_path,
                chunk_size: effective_chunk_size,
                chunks,
                completed,
                etags,
                status: TransferStatus::Pending,
                transferred_bytes,
                error: None,
            }),
        })
    }

    /// All chunks in the plan, in index order.
    pub fn chunks(&self) -> Vec<ChunkDescriptor> {
        let s = self.inner.read().unwrap();
        s.chunks.clone()
    }

    /// Chunks not yet marked complete. These are the only chunks a
    /// resumed session dispatches.
    pub fn pending_chunks(&self) -> Vec<ChunkDescriptor> {
        let s = self.inner.read().unwrap();
        s.chunks
            .iter()
            .filter(|c| !s.completed.contains(&c.index))
            .cloned()
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        let s = self.inner.read().unwrap();
        s.chunks.len()
    }

    pub fn completed_count(&self) -> usize {
        let s = self.inner.read().unwrap();
        s.completed.len()
    }

    pub fn is_chunk_complete(&self, index: u32) -> bool {
        let s = self.inner.read().unwrap();
        s.completed.contains(&index)
    }

    /// Marks the session as dispatching chunk work.
    pub fn mark_in_progress(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::InProgress;
    }

    /// Records one chunk as complete and persists the updated state.
    ///
    /// Idempotent: re-marking a completed chunk does not double-count
    /// its bytes.
    pub fn mark_chunk_complete(&self, index: u32, etag: Option<String>) -> Result<(), TransferError> {
        let mut s = self.inner.write().unwrap();
        if s.completed.insert(index) {
            let length = s
                .chunks
                .iter()
                .find(|c| c.index == index)
                .map(|c| c.length)
                .unwrap_or(0);
            s.transferred_bytes += length;
            if let Some(etag) = etag {
                s.etags.insert(index, etag);
            }
            self.persist(&s)?;
        }
        Ok(())
    }

    /// Transitions to `completed` after verifying the resumability
    /// invariant: every chunk is complete and their lengths sum to the
    /// identity's size. The resume state file is removed.
    pub fn mark_completed(&self) -> Result<(), TransferError> {
        let mut s = self.inner.write().unwrap();
        if s.completed.len() != s.chunks.len() {
            return Err(TransferError::SessionConflict(format!(
                "completion with {}/{} chunks done",
                s.completed.len(),
                s.chunks.len()
            )));
        }
        let sum: u64 = s.chunks.iter().map(|c| c.length).sum();
        if sum != s.identity.size {
            return Err(TransferError::SessionConflict(format!(
                "completed bytes {} != expected size {}",
                sum, s.identity.size
            )));
        }
        s.status = TransferStatus::Completed;
        let _ = fs::remove_file(&self.state_path);
        Ok(())
    }

    /// Short-circuit completion for a download served from the local
    /// cache: no chunk work was dispatched.
    pub fn complete_from_cache(&self) -> Result<(), TransferError> {
        {
            let mut s = self.inner.write().unwrap();
            let indices: Vec<u32> = s.chunks.iter().map(|c| c.index).collect();
            s.completed.extend(indices);
            s.transferred_bytes = s.identity.size;
        }
        self.mark_completed()
    }

    /// Marks the session failed. Completed chunks stay recorded on disk
    /// for a later resume.
    pub fn mark_failed(&self, error: &str) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::Failed;
        s.error = Some(error.to_string());
        if let Err(e) = self.persist(&s) {
            warn!(error = %e, "failed to persist session state");
        }
    }

    /// Marks the session cancelled, keeping completed chunks recorded so
    /// a cancelled-then-resumed session behaves like a failed-then-
    /// resumed one.
    pub fn mark_cancelled(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = TransferStatus::Cancelled;
        if let Err(e) = self.persist(&s) {
            warn!(error = %e, "failed to persist session state");
        }
    }

    /// Clears completed-chunk records and removes the state file.
    ///
    /// Used when staged data fails whole-file verification: the recorded
    /// chunks point at bad bytes and must not seed a resume.
    pub fn discard_resume_state(&self) {
        let mut s = self.inner.write().unwrap();
        s.completed.clear();
        s.etags.clear();
        s.transferred_bytes = 0;
        let _ = fs::remove_file(&self.state_path);
    }

    pub fn status(&self) -> TransferStatus {
        let s = self.inner.read().unwrap();
        s.status
    }

    pub fn identity(&self) -> FileIdentity {
        let s = self.inner.read().unwrap();
        s.identity.clone()
    }

    pub fn direction(&self) -> TransferDirection {
        let s = self.inner.read().unwrap();
        s.direction
    }

    pub fn local_path(&self) -> PathBuf {
        let s = self.inner.read().unwrap();
        s.local_path.clone()
    }

    pub fn transferred_bytes(&self) -> u64 {
        let s = self.inner.read().unwrap();
        s.transferred_bytes
    }

    /// Error message recorded by [`mark_failed`](Self::mark_failed).
    pub fn error(&self) -> Option<String> {
        let s = self.inner.read().unwrap();
        s.error.clone()
    }

    /// Per-part ETags collected so far, ordered by part number. Input
    /// for the multipart finalize call.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        let s = self.inner.read().unwrap();
        let mut parts: Vec<CompletedPart> = s
            .etags
            .iter()
            .map(|(index, etag)| CompletedPart {
                part_number: *index,
                etag: etag.clone(),
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Staging path downloads are assembled in before verification.
    pub fn partial_path(&self) -> PathBuf {
        let s = self.inner.read().unwrap();
        let mut name = s.local_path.as_os_str().to_owned();
        name.push(".");
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }

    /// Point-in-time byte progress.
    pub fn progress(&self) -> FileProgress {
        let s = self.inner.read().unwrap();
        FileProgress {
            handle_id: s.identity.handle_id.clone(),
            total_bytes: s.identity.size,
            transferred_bytes: s.transferred_bytes,
            status: s.status,
            error: s.error.clone(),
        }
    }

    /// Writes the resume record via temp-file-then-rename so a crash
    /// mid-write never leaves a corrupt state file.
    fn persist(&self, s: &SessionInner) -> Result<(), TransferError> {
        let record = PersistedSession {
            identity: s.identity.clone(),
            direction: s.direction,
            local_path: s.local_path.clone(),
            chunk_size: s.chunk_size,
            completed: s.completed.iter().copied().collect(),
            etags: s.etags.clone(),
            status: s.status,
        };
        let raw = serde_json::to_vec_pretty(&record)?;
        let tmp = self
            .state_path
            .with_extension(format!("json.{}", Uuid::new_v4()));
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.state_path)?;
        Ok(())
    }
}

/// Stable key for the session-state file: one file per
/// (identity, local path) pair.
fn session_key(identity: &FileIdentity, local_path: &Path) -> String {
    digest_bytes(
        format!(
            "{}|{}|{}",
            identity.handle_id,
            identity.digest,
            local_path.display()
        )
        .as_bytes(),
    )
}
