//! End-to-end engine tests over an in-memory storage backend.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tempfile::TempDir;
use tokio::sync::Notify;

use granary_protocol::{FileIdentity, FinalizeRequest, SignedUrl, TransferDirection, TransferStatus};
use granary_transfer::{
    ChunkTransport, EngineConfig, PartLimits, RetryConfig, SignedUrlProvider, TransferError,
    TransferRequest, TransferScheduler, TransferSession, digest_bytes,
};

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Chunk index keyed per handle.
type ChunkKey = (String, u32);

/// Mock signed-URL provider and transport backed by process memory.
///
/// URLs encode `mem://<handle>/<chunk index>`; index 0 is the
/// whole-object path.
#[derive(Default)]
struct MemoryBackend {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    parts: Mutex<HashMap<ChunkKey, Vec<u8>>>,
    finalized: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<ChunkKey, u32>>,
    /// Remaining injected 503s per chunk.
    fail_remaining: Mutex<HashMap<ChunkKey, u32>>,
    /// Chunks that respond 403 (expired signed URL).
    auth_expired: Mutex<Vec<ChunkKey>>,
    /// Chunk whose transfer blocks forever, flagging `reached` first.
    block_on: Mutex<Option<ChunkKey>>,
    reached: Notify,
}

impl MemoryBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn put_remote_object(&self, handle: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(handle.to_string(), data.to_vec());
    }

    fn remote_object(&self, handle: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(handle).cloned()
    }

    fn fail_chunk(&self, handle: &str, index: u32, times: u32) {
        self.fail_remaining
            .lock()
            .unwrap()
            .insert((handle.to_string(), index), times);
    }

    fn expire_chunk(&self, handle: &str, index: u32) {
        self.auth_expired
            .lock()
            .unwrap()
            .push((handle.to_string(), index));
    }

    fn block_chunk(&self, handle: &str, index: u32) {
        *self.block_on.lock().unwrap() = Some((handle.to_string(), index));
    }

    fn attempts_for(&self, handle: &str, index: u32) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&(handle.to_string(), index))
            .copied()
            .unwrap_or(0)
    }

    fn total_attempts(&self) -> u32 {
        self.attempts.lock().unwrap().values().sum()
    }

    /// Records an attempt and returns an injected error, if configured.
    async fn checkpoint(&self, url: &SignedUrl) -> Result<ChunkKey, TransferError> {
        let key = parse_url(url);
        *self.attempts.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let blocked = self.block_on.lock().unwrap().as_ref() == Some(&key);
        if blocked {
            self.reached.notify_one();
            // Parked until the test tears the runtime down.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        if self.auth_expired.lock().unwrap().contains(&key) {
            return Err(TransferError::AuthExpired { status: 403 });
        }
        {
            let mut failures = self.fail_remaining.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&key)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(service_unavailable());
            }
        }
        Ok(key)
    }
}

fn service_unavailable() -> TransferError {
    TransferError::Status {
        status: 503,
        body: "injected".into(),
    }
}

fn parse_url(url: &SignedUrl) -> ChunkKey {
    let rest = url.url.strip_prefix("mem://").expect("mock url");
    let (handle, index) = rest.rsplit_once('/').expect("mock url shape");
    (handle.to_string(), index.parse().expect("chunk index"))
}

impl SignedUrlProvider for MemoryBackend {
    fn chunk_url<'a>(
        &'a self,
        identity: &'a FileIdentity,
        direction: TransferDirection,
        chunk_index: u32,
    ) -> BoxFuture<'a, Result<SignedUrl, TransferError>> {
        let url = format!("mem://{}/{}", identity.handle_id, chunk_index);
        Box::pin(async move {
            Ok(match direction {
                TransferDirection::Download => SignedUrl::get(url),
                TransferDirection::Upload => SignedUrl::put(url),
            })
        })
    }

    fn object_url<'a>(
        &'a self,
        identity: &'a FileIdentity,
        direction: TransferDirection,
    ) -> BoxFuture<'a, Result<SignedUrl, TransferError>> {
        self.chunk_url(identity, direction, 0)
    }

    fn finalize_upload<'a>(
        &'a self,
        identity: &'a FileIdentity,
        request: &'a FinalizeRequest,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            assert_eq!(request.handle_id, identity.handle_id);
            let stored = self.parts.lock().unwrap();
            let mut assembled = Vec::new();
            for (i, part) in request.parts.iter().enumerate() {
                assert_eq!(part.part_number as usize, i + 1, "parts must be ordered");
                let body = stored
                    .get(&(identity.handle_id.clone(), part.part_number))
                    .expect("finalize references an uploaded part");
                assert_eq!(part.etag, mock_etag(body), "etag mismatch at finalize");
                assembled.extend_from_slice(body);
            }
            drop(stored);
            self.put_remote_object(&identity.handle_id, &assembled);
            self.finalized
                .lock()
                .unwrap()
                .push(identity.handle_id.clone());
            Ok(())
        })
    }
}

fn mock_etag(body: &[u8]) -> String {
    digest_bytes(body)[..16].to_string()
}

impl ChunkTransport for MemoryBackend {
    fn get_range<'a>(
        &'a self,
        url: &'a SignedUrl,
        offset: u64,
        length: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            let (handle, _) = self.checkpoint(url).await?;
            let objects = self.objects.lock().unwrap();
            let data = objects.get(&handle).ok_or_else(|| TransferError::Status {
                status: 404,
                body: "no such object".into(),
            })?;
            let start = offset as usize;
            let end = (offset + length) as usize;
            Ok(data[start..end].to_vec())
        })
    }

    fn put_part<'a>(
        &'a self,
        url: &'a SignedUrl,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(async move {
            let key = self.checkpoint(url).await?;
            let etag = mock_etag(&body);
            self.parts.lock().unwrap().insert(key, body);
            Ok(etag)
        })
    }

    fn get_object<'a>(
        &'a self,
        url: &'a SignedUrl,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            let (handle, _) = self.checkpoint(url).await?;
            self.remote_object(&handle).ok_or(TransferError::Status {
                status: 404,
                body: "no such object".into(),
            })
        })
    }

    fn put_object<'a>(
        &'a self,
        url: &'a SignedUrl,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            let (handle, _) = self.checkpoint(url).await?;
            self.put_remote_object(&handle, &body);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config(dir: &Path, chunk_size: u64) -> EngineConfig {
    let mut config = EngineConfig::new(dir.join("cache"), dir.join("state"));
    config.chunk_size = chunk_size;
    config.part_limits = PartLimits {
        min_part_size: 1,
        max_part_size: u64::MAX,
        max_parts: 10_000,
    };
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_factor: 2.0,
    };
    config
}

fn scheduler(backend: &Arc<MemoryBackend>, config: EngineConfig) -> TransferScheduler {
    TransferScheduler::new(
        config,
        Arc::clone(backend) as Arc<dyn SignedUrlProvider>,
        Arc::clone(backend) as Arc<dyn ChunkTransport>,
    )
    .unwrap()
}

fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

fn identity_for(handle: &str, content: &[u8]) -> FileIdentity {
    FileIdentity::new(handle, digest_bytes(content), content.len() as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_then_download_roundtrip() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 16 * 1024));

    let content = sample_content(100_000);
    let identity = identity_for("fh-rt", &content);
    let src = dir.path().join("src.bin");
    std::fs::write(&src, &content).unwrap();

    let status = engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Upload,
            local_path: src,
        })
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(backend.remote_object("fh-rt").unwrap(), content);
    assert_eq!(backend.finalized.lock().unwrap().as_slice(), ["fh-rt"]);

    let dest = dir.path().join("dest.bin");
    let status = engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Download,
            local_path: dest.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Completed);

    let downloaded = std::fs::read(&dest).unwrap();
    assert_eq!(downloaded, content);
    assert_eq!(digest_bytes(&downloaded), identity.digest);

    // Finished files are dropped from the progress map.
    assert!(engine.progress_snapshot().files.is_empty());
}

#[tokio::test]
async fn upload_with_wrong_digest_never_reaches_backend() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 16));

    // The identity claims a digest the local bytes don't have.
    let content = sample_content(40);
    let identity = FileIdentity::new("fh-liar", digest_bytes(b"something else"), 40);
    let src = dir.path().join("src.bin");
    std::fs::write(&src, &content).unwrap();

    let err = engine
        .submit(TransferRequest {
            identity,
            direction: TransferDirection::Upload,
            local_path: src,
        })
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::DigestMismatch { .. }));
    assert_eq!(backend.total_attempts(), 0);
    assert!(backend.finalized.lock().unwrap().is_empty());
    assert!(backend.remote_object("fh-liar").is_none());
}

#[tokio::test]
async fn repeat_download_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 1024));

    let content = sample_content(10_000);
    let identity = identity_for("fh-cache", &content);
    backend.put_remote_object("fh-cache", &content);

    let first = dir.path().join("first.bin");
    engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Download,
            local_path: first,
        })
        .unwrap()
        .wait()
        .await
        .unwrap();
    let network_ops = backend.total_attempts();
    assert!(network_ops > 0);

    // Second download of the same identity: cache hit, zero network I/O.
    let second = dir.path().join("second.bin");
    let status = engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Download,
            local_path: second.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(backend.total_attempts(), network_ops);
    assert_eq!(std::fs::read(&second).unwrap(), content);
}

#[tokio::test]
async fn transient_chunk_failures_recovered() {
    // 100-byte file in 25-byte chunks: 4 chunks. Chunk 3 fails twice,
    // succeeds on its third attempt; the transfer still completes.
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 25));

    let content = sample_content(100);
    let identity = identity_for("fh-flaky", &content);
    backend.put_remote_object("fh-flaky", &content);
    backend.fail_chunk("fh-flaky", 3, 2);

    let dest = dir.path().join("dest.bin");
    let status = engine
        .submit(TransferRequest {
            identity,
            direction: TransferDirection::Download,
            local_path: dest.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(backend.attempts_for("fh-flaky", 3), 3);
    assert_eq!(backend.attempts_for("fh-flaky", 1), 1);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn permanent_503_fails_after_exactly_max_attempts() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 64));

    let content = sample_content(64);
    let identity = identity_for("fh-down", &content);
    backend.put_remote_object("fh-down", &content);
    backend.fail_chunk("fh-down", 1, u32::MAX);

    let handle = engine
        .submit(TransferRequest {
            identity,
            direction: TransferDirection::Download,
            local_path: dir.path().join("dest.bin"),
        })
        .unwrap();
    let err = handle.wait().await.unwrap_err();

    match err {
        TransferError::AttemptsExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, TransferError::Status { status: 503, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.attempts_for("fh-down", 1), 3);
}

#[tokio::test]
async fn expired_url_surfaces_as_distinct_error() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 64));

    let content = sample_content(64);
    let identity = identity_for("fh-auth", &content);
    backend.put_remote_object("fh-auth", &content);
    backend.expire_chunk("fh-auth", 1);

    let err = engine
        .submit(TransferRequest {
            identity,
            direction: TransferDirection::Download,
            local_path: dir.path().join("dest.bin"),
        })
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::AuthExpired { status: 403 }));
    // Fatal: no retry happened.
    assert_eq!(backend.attempts_for("fh-auth", 1), 1);
}

#[tokio::test]
async fn one_file_failure_does_not_affect_others() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 1024));

    let good = sample_content(5_000);
    let good_id = identity_for("fh-good", &good);
    backend.put_remote_object("fh-good", &good);

    let bad = sample_content(5_000);
    let bad_id = identity_for("fh-bad", &bad);
    backend.put_remote_object("fh-bad", &bad);
    backend.fail_chunk("fh-bad", 2, u32::MAX);

    let good_handle = engine
        .submit(TransferRequest {
            identity: good_id,
            direction: TransferDirection::Download,
            local_path: dir.path().join("good.bin"),
        })
        .unwrap();
    let bad_handle = engine
        .submit(TransferRequest {
            identity: bad_id,
            direction: TransferDirection::Download,
            local_path: dir.path().join("bad.bin"),
        })
        .unwrap();

    assert_eq!(
        good_handle.wait().await.unwrap(),
        TransferStatus::Completed
    );
    assert!(bad_handle.wait().await.is_err());
    assert_eq!(std::fs::read(dir.path().join("good.bin")).unwrap(), good);
    // Both outcomes, including the failure, leave the progress map empty.
    assert!(engine.progress_snapshot().files.is_empty());
}

#[tokio::test]
async fn resumed_download_skips_completed_chunks() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let config = test_config(dir.path(), 10);

    let content = sample_content(50); // 5 chunks of 10 bytes
    let identity = identity_for("fh-resume", &content);
    backend.put_remote_object("fh-resume", &content);
    let dest = dir.path().join("dest.bin");

    // Simulate an interrupted run: chunks 1-3 persisted as complete and
    // their bytes already staged.
    {
        let session = TransferSession::load_or_create(
            &config.state_dir,
            identity.clone(),
            TransferDirection::Download,
            dest.clone(),
            config.chunk_size,
            &config.part_limits,
        )
        .unwrap();
        let mut partial = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(session.partial_path())
            .unwrap();
        partial.set_len(50).unwrap();
        partial.seek(SeekFrom::Start(0)).unwrap();
        partial.write_all(&content[..30]).unwrap();
        for index in 1..=3 {
            session.mark_chunk_complete(index, None).unwrap();
        }
    }

    let engine = scheduler(&backend, config);
    let status = engine
        .submit(TransferRequest {
            identity,
            direction: TransferDirection::Download,
            local_path: dest.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
    // Only the two pending chunks hit the network.
    for index in 1..=3 {
        assert_eq!(backend.attempts_for("fh-resume", index), 0);
    }
    assert_eq!(backend.attempts_for("fh-resume", 4), 1);
    assert_eq!(backend.attempts_for("fh-resume", 5), 1);
}

#[tokio::test]
async fn resume_after_interrupted_completion_verifies_destination() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let config = test_config(dir.path(), 10);

    let content = sample_content(50);
    let identity = identity_for("fh-crashed", &content);
    backend.put_remote_object("fh-crashed", &content);
    let dest = dir.path().join("dest.bin");

    // A run that died after renaming the verified staging file into
    // place but before the completed transition: all chunks recorded,
    // destination present, no staging file.
    {
        let session = TransferSession::load_or_create(
            &config.state_dir,
            identity.clone(),
            TransferDirection::Download,
            dest.clone(),
            config.chunk_size,
            &config.part_limits,
        )
        .unwrap();
        for index in 1..=5 {
            session.mark_chunk_complete(index, None).unwrap();
        }
    }
    std::fs::write(&dest, &content).unwrap();

    let engine = scheduler(&backend, config);
    let status = engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Download,
            local_path: dest.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(status, TransferStatus::Completed);
    // Everything recovered from local state; no network traffic.
    assert_eq!(backend.total_attempts(), 0);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
    assert!(engine.cache().lookup(&identity).unwrap().is_some());
}

#[tokio::test]
async fn cancellation_preserves_completed_chunks() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    // Single worker: chunks complete strictly in index order.
    let mut config = test_config(dir.path(), 10);
    config.max_workers = 1;
    let engine = scheduler(&backend, config);

    let content = sample_content(100); // 10 chunks
    let identity = identity_for("fh-cancel", &content);
    backend.put_remote_object("fh-cancel", &content);
    backend.block_chunk("fh-cancel", 5);

    let handle = engine
        .submit(TransferRequest {
            identity,
            direction: TransferDirection::Download,
            local_path: dir.path().join("dest.bin"),
        })
        .unwrap();

    // Chunks 1-4 done, chunk 5 parked in the transport.
    backend.reached.notified().await;
    handle.cancel();

    let session = Arc::clone(handle.session());
    let status = handle.wait().await.unwrap();
    assert_eq!(status, TransferStatus::Cancelled);
    assert_eq!(session.completed_count(), 4);
    for index in 1..=4 {
        assert!(session.is_chunk_complete(index));
    }
    // No chunk beyond the parked one was ever dispatched.
    for index in 6..=10 {
        assert_eq!(backend.attempts_for("fh-cancel", index), 0);
    }
}

#[tokio::test]
async fn empty_file_roundtrip_uses_direct_path() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 1024));

    let identity = FileIdentity::new("fh-empty", digest_bytes(b""), 0);
    let src = dir.path().join("empty-src.bin");
    std::fs::write(&src, b"").unwrap();

    let status = engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Upload,
            local_path: src,
        })
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(backend.remote_object("fh-empty").unwrap(), b"");
    // Direct PUT, no multipart finalize.
    assert!(backend.finalized.lock().unwrap().is_empty());

    let dest = dir.path().join("empty-dest.bin");
    let status = engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Download,
            local_path: dest.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), b"");

    // Empty downloads land in the cache like any other download.
    let network_ops = backend.total_attempts();
    let again = dir.path().join("empty-again.bin");
    let status = engine
        .submit(TransferRequest {
            identity,
            direction: TransferDirection::Download,
            local_path: again.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Completed);
    assert_eq!(backend.total_attempts(), network_ops);
    assert_eq!(std::fs::read(&again).unwrap(), b"");
}

#[tokio::test]
async fn corrupted_download_reported_as_integrity_error() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let engine = scheduler(&backend, test_config(dir.path(), 1024));

    let content = sample_content(2_000);
    // Identity claims a different digest than the backend serves.
    let identity = FileIdentity::new("fh-corrupt", digest_bytes(b"other"), content.len() as u64);
    backend.put_remote_object("fh-corrupt", &content);

    let dest = dir.path().join("dest.bin");
    let err = engine
        .submit(TransferRequest {
            identity: identity.clone(),
            direction: TransferDirection::Download,
            local_path: dest.clone(),
        })
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::DigestMismatch { .. }));
    // Bad content never materializes at the destination or in the cache.
    assert!(!dest.exists());
    assert!(engine.cache().lookup(&identity).unwrap().is_none());
}

#[tokio::test]
async fn many_files_share_the_worker_pool() {
    let dir = TempDir::new().unwrap();
    let backend = MemoryBackend::new();
    let mut config = test_config(dir.path(), 512);
    config.max_workers = 3;
    let engine = scheduler(&backend, config);

    let mut handles = Vec::new();
    let mut expected = Vec::new();
    for i in 0..8 {
        let handle_id = format!("fh-many-{i}");
        let content = sample_content(3_000 + i * 17);
        backend.put_remote_object(&handle_id, &content);
        let dest = dir.path().join(format!("dest-{i}.bin"));
        let request = TransferRequest {
            identity: identity_for(&handle_id, &content),
            direction: TransferDirection::Download,
            local_path: dest.clone(),
        };
        handles.push(engine.submit(request).unwrap());
        expected.push((dest, content));
    }

    for handle in handles {
        assert_eq!(handle.wait().await.unwrap(), TransferStatus::Completed);
    }
    for (dest, content) in expected {
        assert_eq!(std::fs::read(&dest).unwrap(), content);
    }
}
