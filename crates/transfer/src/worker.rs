//! Chunk execution: one byte range moved over HTTP, with retry.

use std::future::Future;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use granary_protocol::{FileIdentity, TransferDirection};

use crate::TransferError;
use crate::backend::{ChunkTransport, SignedUrlProvider};
use crate::plan::ChunkDescriptor;
use crate::progress::ProgressReporter;
use crate::retry::{ErrorClass, RetryPolicy};
use crate::session::TransferSession;

/// Everything a pool worker needs to run one file's chunks. Shared by
/// all of that file's chunk jobs.
pub(crate) struct ChunkContext {
    pub session: Arc<TransferSession>,
    pub identity: FileIdentity,
    pub direction: TransferDirection,
    /// Upload source path.
    pub local_path: PathBuf,
    /// Download staging file; chunks land here at their exact offset.
    pub partial_path: PathBuf,
    pub provider: Arc<dyn SignedUrlProvider>,
    pub transport: Arc<dyn ChunkTransport>,
    pub retry: Arc<RetryPolicy>,
    pub progress: Arc<ProgressReporter>,
    pub cancel: CancellationToken,
}

/// Runs `op` under the retry policy, sleeping the computed backoff
/// between attempts. Cancellation is honored at every attempt boundary
/// and during backoff sleeps, never mid-write.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match policy.delay_before_retry(&err, attempt) {
                Some(delay) => {
                    warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    }
                }
                None => {
                    return Err(match policy.classify(&err) {
                        ErrorClass::Fatal => err,
                        _ => TransferError::AttemptsExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        },
                    });
                }
            },
        }
    }
}

/// Transfers one chunk, marks it complete in the session, and reports
/// the byte delta. Retryable failures are absorbed here; only
/// policy-exhausted or fatal errors surface.
pub(crate) async fn run_chunk(
    ctx: &ChunkContext,
    desc: &ChunkDescriptor,
) -> Result<(), TransferError> {
    // The signed URL is requested once per chunk job. An expired URL is
    // fatal here; the caller re-requests a fresh one and resubmits.
    let url = with_retry(&ctx.retry, &ctx.cancel, "signed-url request", || {
        ctx.provider.chunk_url(&ctx.identity, ctx.direction, desc.index)
    })
    .await?;

    let url = &url;
    let etag = match ctx.direction {
        TransferDirection::Download => {
            with_retry(&ctx.retry, &ctx.cancel, "chunk download", move || async move {
                let data = ctx.transport.get_range(url, desc.offset, desc.length).await?;
                if data.len() as u64 != desc.length {
                    return Err(TransferError::ChunkLengthMismatch {
                        index: desc.index,
                        expected: desc.length,
                        actual: data.len() as u64,
                    });
                }
                write_at_offset(&ctx.partial_path, desc.offset, data).await?;
                Ok(None)
            })
            .await?
        }
        TransferDirection::Upload => {
            with_retry(&ctx.retry, &ctx.cancel, "chunk upload", move || async move {
                let body = read_range(&ctx.local_path, desc.offset, desc.length).await?;
                let etag = ctx.transport.put_part(url, body).await?;
                Ok(Some(etag))
            })
            .await?
        }
    };

    ctx.session.mark_chunk_complete(desc.index, etag)?;
    ctx.progress.report(&ctx.identity.handle_id, desc.length);
    debug!(
        handle = %ctx.identity.handle_id,
        chunk = desc.index,
        bytes = desc.length,
        "chunk complete"
    );
    Ok(())
}

/// Writes `data` into `path` at the given byte offset.
pub(crate) async fn write_at_offset(
    path: &Path,
    offset: u64,
    data: Vec<u8>,
) -> Result<(), TransferError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), TransferError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        Ok(())
    })
    .await?
}

/// Reads exactly `length` bytes from `path` starting at `offset`.
pub(crate) async fn read_range(
    path: &Path,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>, TransferError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransferError> {
        let mut file = std::fs::File::open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    })
    .await?
}
