//! Transfer scheduling: one bounded worker pool shared across all files.
//!
//! Chunk work items from every submitted file are interleaved in a
//! single queue, so one very large file cannot starve many small ones
//! and the number of simultaneously open connections stays within the
//! configured ceiling no matter how many files are in flight.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use granary_cache::FileCache;
use granary_protocol::{
    FileIdentity, FileProgress, FinalizeRequest, ProgressSnapshot, TransferDirection,
    TransferStatus,
};

use crate::TransferError;
use crate::backend::{ChunkTransport, SignedUrlProvider};
use crate::config::EngineConfig;
use crate::digest::{digest_bytes, digest_file};
use crate::plan::ChunkDescriptor;
use crate::progress::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::session::TransferSession;
use crate::worker::{self, ChunkContext, with_retry};

/// Capacity of the shared chunk queue.
const QUEUE_CAPACITY: usize = 256;

/// A transfer to submit to the scheduler.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub identity: FileIdentity,
    pub direction: TransferDirection,
    /// Upload source or download destination.
    pub local_path: PathBuf,
}

struct ChunkJob {
    descriptor: ChunkDescriptor,
    ctx: Arc<ChunkContext>,
    results: mpsc::Sender<ChunkOutcome>,
}

struct ChunkOutcome {
    index: u32,
    result: Result<(), TransferError>,
}

/// Handle to one submitted transfer.
pub struct TransferHandle {
    session: Arc<TransferSession>,
    cancel: CancellationToken,
    done: oneshot::Receiver<Result<TransferStatus, TransferError>>,
}

impl TransferHandle {
    /// Waits for the transfer to reach a terminal status.
    ///
    /// `Ok(Completed)` and `Ok(Cancelled)` are terminal successes of
    /// their kind; a failed session surfaces its error.
    pub async fn wait(self) -> Result<TransferStatus, TransferError> {
        match self.done.await {
            Ok(result) => result,
            // Scheduler dropped mid-flight.
            Err(_) => Err(TransferError::Cancelled),
        }
    }

    /// Requests cooperative cancellation: no further chunks are
    /// dispatched and in-flight workers stop at their next safe
    /// checkpoint. Completed chunks stay recorded for a later resume.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Point-in-time byte progress for this file.
    pub fn progress(&self) -> FileProgress {
        self.session.progress()
    }

    /// Current session status.
    pub fn status(&self) -> TransferStatus {
        self.session.status()
    }

    /// The session backing this transfer.
    pub fn session(&self) -> &Arc<TransferSession> {
        &self.session
    }
}

/// Concurrent file transfer scheduler.
///
/// Construct one per configuration; there is no process-wide instance.
/// Must be created inside a tokio runtime, since it spawns its worker
/// pool and the progress notifier.
pub struct TransferScheduler {
    config: EngineConfig,
    provider: Arc<dyn SignedUrlProvider>,
    transport: Arc<dyn ChunkTransport>,
    cache: Arc<FileCache>,
    progress: Arc<ProgressReporter>,
    queue_tx: mpsc::Sender<ChunkJob>,
    shutdown: CancellationToken,
}

impl TransferScheduler {
    /// Creates a scheduler and spawns its chunk worker pool.
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn SignedUrlProvider>,
        transport: Arc<dyn ChunkTransport>,
    ) -> Result<Self, TransferError> {
        std::fs::create_dir_all(&config.state_dir)?;
        let cache = Arc::new(FileCache::new(&config.cache_root)?);
        let progress = Arc::new(ProgressReporter::new());
        progress.start(config.progress_interval);

        let shutdown = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel::<ChunkJob>(QUEUE_CAPACITY);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let pool_size = config.max_workers.max(1);
        for worker_id in 0..pool_size {
            let queue_rx = Arc::clone(&queue_rx);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    // The lock guards only the receive, never a chunk's I/O.
                    let job = {
                        let mut rx = queue_rx.lock().await;
                        tokio::select! {
                            job = rx.recv() => job,
                            _ = shutdown.cancelled() => None,
                        }
                    };
                    let Some(job) = job else { break };

                    let result = if job.ctx.cancel.is_cancelled() {
                        Err(TransferError::Cancelled)
                    } else {
                        worker::run_chunk(&job.ctx, &job.descriptor).await
                    };
                    let _ = job
                        .results
                        .send(ChunkOutcome {
                            index: job.descriptor.index,
                            result,
                        })
                        .await;
                }
                debug!(worker = worker_id, "chunk worker stopped");
            });
        }

        Ok(Self {
            config,
            provider,
            transport,
            cache,
            progress,
            queue_tx,
            shutdown,
        })
    }

    /// Submits a transfer and returns its handle. Chunk work for all
    /// submitted files shares the same worker pool.
    pub fn submit(&self, request: TransferRequest) -> Result<TransferHandle, TransferError> {
        let session = Arc::new(TransferSession::load_or_create(
            &self.config.state_dir,
            request.identity.clone(),
            request.direction,
            request.local_path.clone(),
            self.config.chunk_size,
            &self.config.part_limits,
        )?);
        let cancel = self.shutdown.child_token();
        let (done_tx, done_rx) = oneshot::channel();

        self.progress.register(
            &request.identity.handle_id,
            request.identity.size,
            session.transferred_bytes(),
        );

        let coordinator = Coordinator {
            identity: request.identity,
            direction: request.direction,
            local_path: request.local_path,
            session: Arc::clone(&session),
            provider: Arc::clone(&self.provider),
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            progress: Arc::clone(&self.progress),
            retry: Arc::new(RetryPolicy::new(self.config.retry.clone())),
            queue_tx: self.queue_tx.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(async move {
            let result = coordinator.run().await;
            match &result {
                Ok(status) => info!(status = ?status, "transfer finished"),
                Err(e) => warn!(error = %e, "transfer failed"),
            }
            let _ = done_tx.send(result);
        });

        Ok(TransferHandle {
            session,
            cancel,
            done: done_rx,
        })
    }

    /// Registers a subscriber for rate-limited aggregate progress.
    pub fn on_progress(&self, callback: crate::progress::ProgressCallback) {
        self.progress.on_progress(callback);
    }

    /// Point-in-time aggregate progress across all files.
    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// The download cache, for explicit purges.
    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Cancels every in-flight transfer and stops the worker pool.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.progress.stop();
    }
}

impl Drop for TransferScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Per-file coordination
// ---------------------------------------------------------------------------

struct Coordinator {
    identity: FileIdentity,
    direction: TransferDirection,
    local_path: PathBuf,
    session: Arc<TransferSession>,
    provider: Arc<dyn SignedUrlProvider>,
    transport: Arc<dyn ChunkTransport>,
    cache: Arc<FileCache>,
    progress: Arc<ProgressReporter>,
    retry: Arc<RetryPolicy>,
    queue_tx: mpsc::Sender<ChunkJob>,
    cancel: CancellationToken,
}

impl Coordinator {
    async fn run(self) -> Result<TransferStatus, TransferError> {
        let result = match self.execute().await {
            Ok(status) => Ok(status),
            Err(TransferError::Cancelled) => {
                self.session.mark_cancelled();
                Ok(TransferStatus::Cancelled)
            }
            Err(e) => {
                self.session.mark_failed(&e.to_string());
                Err(e)
            }
        };
        // One last per-file notification with the terminal outcome, then
        // drop the file from the progress map.
        match &result {
            Ok(status) => self
                .progress
                .complete(&self.identity.handle_id, *status, None),
            Err(e) => self.progress.complete(
                &self.identity.handle_id,
                TransferStatus::Failed,
                Some(e.to_string()),
            ),
        }
        result
    }

    async fn execute(&self) -> Result<TransferStatus, TransferError> {
        // Cache hit short-circuits a download with no network I/O.
        if self.direction == TransferDirection::Download
            && let Some(entry) = self.cache.lookup(&self.identity)?
        {
            debug!(handle = %self.identity.handle_id, "download served from cache");
            let source = entry.path.clone();
            let dest = self.local_path.clone();
            tokio::task::spawn_blocking(move || -> Result<(), TransferError> {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&source, &dest)?;
                Ok(())
            })
            .await??;
            let already = self.session.transferred_bytes();
            self.session.complete_from_cache()?;
            self.progress
                .report(&self.identity.handle_id, self.identity.size - already);
            return Ok(TransferStatus::Completed);
        }

        // Zero-byte files take a direct whole-object path; some backends
        // reject zero-length multipart chunks.
        if self.identity.size == 0 {
            return self.transfer_empty().await;
        }

        self.prepare_local_files().await?;

        let pending = self.session.pending_chunks();
        self.session.mark_in_progress();
        let total = pending.len();
        debug!(
            handle = %self.identity.handle_id,
            pending = total,
            completed = self.session.completed_count(),
            "dispatching chunks"
        );

        let ctx = Arc::new(ChunkContext {
            session: Arc::clone(&self.session),
            identity: self.identity.clone(),
            direction: self.direction,
            local_path: self.local_path.clone(),
            partial_path: self.session.partial_path(),
            provider: Arc::clone(&self.provider),
            transport: Arc::clone(&self.transport),
            retry: Arc::clone(&self.retry),
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
        });

        let (results_tx, mut results_rx) = mpsc::channel(total.max(1));

        // Feed the shared queue from its own task so a full queue never
        // blocks outcome handling.
        {
            let queue_tx = self.queue_tx.clone();
            let ctx = Arc::clone(&ctx);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                for descriptor in pending {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let job = ChunkJob {
                        descriptor,
                        ctx: Arc::clone(&ctx),
                        results: results_tx.clone(),
                    };
                    if queue_tx.send(job).await.is_err() {
                        break;
                    }
                }
            });
        }

        let mut remaining = total;
        while remaining > 0 {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                outcome = results_rx.recv() => {
                    let Some(outcome) = outcome else {
                        // Dispatcher and workers gone (engine shutdown).
                        return Err(TransferError::Cancelled);
                    };
                    match outcome.result {
                        Ok(()) => remaining -= 1,
                        Err(TransferError::Cancelled) => return Err(TransferError::Cancelled),
                        Err(err) => {
                            // Stop this file's remaining dispatch; other
                            // sessions keep their workers.
                            self.cancel.cancel();
                            error!(
                                handle = %self.identity.handle_id,
                                chunk = outcome.index,
                                error = %err,
                                "chunk failed"
                            );
                            return Err(err);
                        }
                    }
                }
            }
        }

        match self.direction {
            TransferDirection::Download => self.finish_download().await,
            TransferDirection::Upload => self.finish_upload().await,
        }
    }

    /// Validates the upload source or pre-sizes the download staging
    /// file so out-of-order offset writes land in a file of final size.
    async fn prepare_local_files(&self) -> Result<(), TransferError> {
        match self.direction {
            TransferDirection::Upload => {
                let meta = tokio::fs::metadata(&self.local_path).await?;
                if meta.len() != self.identity.size {
                    return Err(TransferError::SessionConflict(format!(
                        "local file is {} bytes, identity says {}",
                        meta.len(),
                        self.identity.size
                    )));
                }
                // The local content must be the content the identity
                // names; a session never completes over mismatched bytes.
                let path = self.local_path.clone();
                let actual =
                    tokio::task::spawn_blocking(move || digest_file(&path)).await??;
                if actual != self.identity.digest {
                    return Err(TransferError::DigestMismatch {
                        expected: self.identity.digest.clone(),
                        actual,
                    });
                }
            }
            TransferDirection::Download => {
                // Nothing pending means an earlier run staged (and maybe
                // finalized) everything; finish_download picks the file
                // to verify. Re-creating the staging file here would
                // clobber it with zeroes.
                if self.session.pending_chunks().is_empty() {
                    return Ok(());
                }
                let partial = self.session.partial_path();
                let size = self.identity.size;
                tokio::task::spawn_blocking(move || -> Result<(), TransferError> {
                    if let Some(parent) = partial.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let file = std::fs::OpenOptions::new()
                        .create(true)
                        .write(true)
                        .truncate(false)
                        .open(&partial)?;
                    file.set_len(size)?;
                    Ok(())
                })
                .await??;
            }
        }
        Ok(())
    }

    /// Direct PUT/GET for the distinguished empty-file plan.
    async fn transfer_empty(&self) -> Result<TransferStatus, TransferError> {
        // Both directions transfer empty content; the identity must name
        // the empty digest.
        let empty_digest = digest_bytes(b"");
        if empty_digest != self.identity.digest {
            return Err(TransferError::DigestMismatch {
                expected: self.identity.digest.clone(),
                actual: empty_digest,
            });
        }
        if self.direction == TransferDirection::Upload {
            let meta = tokio::fs::metadata(&self.local_path).await?;
            if meta.len() != 0 {
                return Err(TransferError::SessionConflict(format!(
                    "local file is {} bytes, identity says 0",
                    meta.len()
                )));
            }
        }

        let url = with_retry(&self.retry, &self.cancel, "signed-url request", || {
            self.provider.object_url(&self.identity, self.direction)
        })
        .await?;
        let url = &url;

        match self.direction {
            TransferDirection::Upload => {
                with_retry(&self.retry, &self.cancel, "empty upload", move || {
                    self.transport.put_object(url, Vec::new())
                })
                .await?;
            }
            TransferDirection::Download => {
                with_retry(&self.retry, &self.cancel, "empty download", move || async move {
                    let data = self.transport.get_object(url).await?;
                    if !data.is_empty() {
                        return Err(TransferError::ChunkLengthMismatch {
                            index: 1,
                            expected: 0,
                            actual: data.len() as u64,
                        });
                    }
                    Ok(())
                })
                .await?;
                if let Some(parent) = self.local_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&self.local_path, b"").await?;
                self.commit_to_cache().await?;
            }
        }

        self.session.mark_chunk_complete(1, None)?;
        self.session.mark_completed()?;
        Ok(TransferStatus::Completed)
    }

    /// Verifies the assembled staging file, renames it into place, and
    /// commits it to the cache.
    ///
    /// A run that died between that rename and the completed transition
    /// leaves every chunk recorded but no staging file; in that case the
    /// destination the earlier run produced is verified instead.
    async fn finish_download(&self) -> Result<TransferStatus, TransferError> {
        let partial = self.session.partial_path();
        let (verify_path, staged) = match tokio::fs::metadata(&partial).await {
            Ok(_) => (partial.clone(), true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match tokio::fs::metadata(&self.local_path).await {
                    Ok(_) => (self.local_path.clone(), false),
                    // Neither file exists; the recorded chunks point at
                    // nothing, so the state must not seed a resume.
                    Err(_) => {
                        self.session.discard_resume_state();
                        return Err(e.into());
                    }
                }
            }
            Err(e) => return Err(e.into()),
        };

        let actual = {
            let path = verify_path.clone();
            tokio::task::spawn_blocking(move || digest_file(&path)).await??
        };
        if actual != self.identity.digest {
            // The bytes are bad; a resume over them would only fail again.
            let _ = tokio::fs::remove_file(&verify_path).await;
            self.session.discard_resume_state();
            return Err(TransferError::DigestMismatch {
                expected: self.identity.digest.clone(),
                actual,
            });
        }

        if staged {
            tokio::fs::rename(&partial, &self.local_path).await?;
        }
        self.commit_to_cache().await?;
        self.session.mark_completed()?;
        Ok(TransferStatus::Completed)
    }

    /// Commits the verified destination file to the download cache.
    async fn commit_to_cache(&self) -> Result<(), TransferError> {
        let cache = Arc::clone(&self.cache);
        let identity = self.identity.clone();
        let dest = self.local_path.clone();
        tokio::task::spawn_blocking(move || cache.commit(&identity, &dest)).await??;
        Ok(())
    }

    /// Finalizes the multipart upload with the ordered part list.
    async fn finish_upload(&self) -> Result<TransferStatus, TransferError> {
        let request = FinalizeRequest::new(
            self.identity.handle_id.clone(),
            self.session.completed_parts(),
        );
        with_retry(&self.retry, &self.cancel, "multipart finalize", || {
            self.provider.finalize_upload(&self.identity, &request)
        })
        .await?;
        self.session.mark_completed()?;
        Ok(TransferStatus::Completed)
    }
}
