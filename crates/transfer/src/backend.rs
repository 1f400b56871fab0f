//! Backend collaborator traits and the production HTTP transport.
//!
//! The engine never talks to the platform's metadata API directly: a
//! [`SignedUrlProvider`] hands it pre-authorized URLs and performs the
//! multipart finalize call, and a [`ChunkTransport`] moves bytes over
//! HTTP. Both are object-safe so callers and tests can swap them.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{ETAG, RANGE, RETRY_AFTER};
use tracing::trace;

use granary_protocol::{FileIdentity, FinalizeRequest, SignedUrl, TransferDirection};

use crate::TransferError;

/// Issues short-lived signed URLs and finalizes multipart uploads.
///
/// URL expiry is not the engine's problem: an expired URL surfaces as
/// [`TransferError::AuthExpired`] and the caller re-requests a fresh one.
pub trait SignedUrlProvider: Send + Sync {
    /// Returns a URL authorized to transfer exactly one chunk's byte
    /// range.
    fn chunk_url<'a>(
        &'a self,
        identity: &'a FileIdentity,
        direction: TransferDirection,
        chunk_index: u32,
    ) -> BoxFuture<'a, Result<SignedUrl, TransferError>>;

    /// Returns a URL for a whole-object transfer. Used for the
    /// distinguished empty-file path, which performs a single direct
    /// PUT/GET instead of chunking.
    fn object_url<'a>(
        &'a self,
        identity: &'a FileIdentity,
        direction: TransferDirection,
    ) -> BoxFuture<'a, Result<SignedUrl, TransferError>>;

    /// Finalizes a multipart upload. The request carries the part list
    /// already ordered by part number.
    fn finalize_upload<'a>(
        &'a self,
        identity: &'a FileIdentity,
        request: &'a FinalizeRequest,
    ) -> BoxFuture<'a, Result<(), TransferError>>;
}

/// Moves chunk bytes over the wire.
pub trait ChunkTransport: Send + Sync {
    /// Fetches exactly `length` bytes starting at `offset` via an HTTP
    /// range request.
    fn get_range<'a>(
        &'a self,
        url: &'a SignedUrl,
        offset: u64,
        length: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>>;

    /// Uploads one part body and returns the backend's ETag.
    fn put_part<'a>(
        &'a self,
        url: &'a SignedUrl,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, TransferError>>;

    /// Fetches a whole object (empty-file direct path).
    fn get_object<'a>(&'a self, url: &'a SignedUrl) -> BoxFuture<'a, Result<Vec<u8>, TransferError>>;

    /// Uploads a whole object (empty-file direct path).
    fn put_object<'a>(
        &'a self,
        url: &'a SignedUrl,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), TransferError>>;
}

/// Production [`ChunkTransport`] over `reqwest` with a bounded
/// per-request timeout.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose every request times out after
    /// `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http })
    }

    fn request(&self, url: &SignedUrl) -> reqwest::RequestBuilder {
        let mut req = match url.method.as_str() {
            "PUT" => self.http.put(&url.url),
            _ => self.http.get(&url.url),
        };
        for (name, value) in &url.headers {
            req = req.header(name, value);
        }
        req
    }
}

/// Maps a non-success HTTP response onto the engine's error taxonomy.
async fn status_error(resp: reqwest::Response) -> TransferError {
    let status = resp.status().as_u16();
    match status {
        403 | 410 => TransferError::AuthExpired { status },
        429 => {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            TransferError::RateLimited { retry_after }
        }
        _ => {
            let body = resp.text().await.unwrap_or_default();
            TransferError::Status { status, body }
        }
    }
}

impl ChunkTransport for HttpTransport {
    fn get_range<'a>(
        &'a self,
        url: &'a SignedUrl,
        offset: u64,
        length: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            let end = offset + length.saturating_sub(1);
            let resp = self
                .request(url)
                .header(RANGE, format!("bytes={offset}-{end}"))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(status_error(resp).await);
            }
            trace!(offset, length, status = resp.status().as_u16(), "range fetched");
            Ok(resp.bytes().await?.to_vec())
        })
    }

    fn put_part<'a>(
        &'a self,
        url: &'a SignedUrl,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, TransferError>> {
        Box::pin(async move {
            let resp = self.request(url).body(body).send().await?;
            if !resp.status().is_success() {
                return Err(status_error(resp).await);
            }
            let etag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string())
                .ok_or(TransferError::MissingEtag)?;
            Ok(etag)
        })
    }

    fn get_object<'a>(
        &'a self,
        url: &'a SignedUrl,
    ) -> BoxFuture<'a, Result<Vec<u8>, TransferError>> {
        Box::pin(async move {
            let resp = self.request(url).send().await?;
            if !resp.status().is_success() {
                return Err(status_error(resp).await);
            }
            Ok(resp.bytes().await?.to_vec())
        })
    }

    fn put_object<'a>(
        &'a self,
        url: &'a SignedUrl,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            let resp = self.request(url).body(body).send().await?;
            if !resp.status().is_success() {
                return Err(status_error(resp).await);
            }
            Ok(())
        })
    }
}
