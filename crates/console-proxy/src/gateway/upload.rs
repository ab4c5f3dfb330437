//! Streaming archive upload.
//!
//! The payload never resides fully in memory: inbound chunks are
//! appended to a durable temp sink at the correct offset, and only once
//! the declared length is satisfied is the artifact re-streamed to the
//! gateway as a PUT bounded by the outbound connection's write
//! readiness. The sink is released when the job is dropped, whatever
//! the forwarding outcome.

use crate::domain::error::{ProxyError, TransportCode, GATEWAY_SERVICE, UPLOAD_SERVICE};
use crate::gateway::client::GatewayClient;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_LENGTH;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::error;

/// Header carrying the user-supplied archive filename to the gateway
pub const ARCHIVE_NAME_HEADER: &str = "X-Archive-Name";

/// Fixed gateway path the archive is deployed to (versioned)
pub const DEPLOY_PATH: &str = "apps";

/// Fixed gateway path for the deploy status query (versioned)
pub const DEPLOY_STATUS_PATH: &str = "deploy/status";

/// One in-flight upload, scoped to a single request's lifetime.
///
/// Invariant: `received` never exceeds `declared_len`; the gateway
/// transfer starts only when they are equal.
pub struct UploadJob {
    declared_len: u64,
    received: u64,
    archive_name: String,
    sink: NamedTempFile,
    file: tokio::fs::File,
}

impl UploadJob {
    /// Create a job with its temp sink in `dir`.
    pub async fn create(
        dir: &Path,
        archive_name: &str,
        declared_len: u64,
    ) -> Result<Self, ProxyError> {
        let sink = tempfile::Builder::new()
            .prefix("archive-")
            .tempfile_in(dir)
            .map_err(sink_error)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(sink.path())
            .await
            .map_err(sink_error)?;
        Ok(Self {
            declared_len,
            received: 0,
            archive_name: archive_name.to_string(),
            sink,
            file,
        })
    }

    /// Append one arriving chunk. Chunk boundaries are arbitrary; the
    /// sink accumulates them in arrival order.
    pub async fn append(&mut self, chunk: &[u8]) -> Result<(), ProxyError> {
        let next = self.received + chunk.len() as u64;
        if next > self.declared_len {
            return Err(ProxyError::Validation(format!(
                "upload exceeds declared Content-Length of {} bytes",
                self.declared_len
            )));
        }
        self.file.write_all(chunk).await.map_err(sink_error)?;
        self.received = next;
        Ok(())
    }

    /// Whether the declared length has been satisfied.
    pub fn is_complete(&self) -> bool {
        self.received == self.declared_len
    }

    pub fn declared_len(&self) -> u64 {
        self.declared_len
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    /// Consume the job and read the sink back in order as a byte
    /// stream. The temp file stays alive inside the stream and is
    /// released when the stream is dropped.
    async fn into_read_stream(
        mut self,
    ) -> Result<impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static, ProxyError>
    {
        self.file.flush().await.map_err(sink_error)?;
        let reader = tokio::fs::File::open(self.sink.path())
            .await
            .map_err(sink_error)?;
        let sink = self.sink;
        Ok(ReaderStream::new(reader).map(move |chunk| {
            let _keep_alive = &sink;
            chunk
        }))
    }
}

/// Re-stream a completed job to the gateway's archive-deploy path.
///
/// The PUT carries the original content length and the archive-name
/// header; a non-200 gateway status surfaces the gateway's own body.
pub async fn deploy(client: &GatewayClient, job: UploadJob) -> Result<(), ProxyError> {
    debug_assert!(job.is_complete());
    let declared_len = job.declared_len();
    let archive_name = job.archive_name().to_string();
    let url = client.rewrite(DEPLOY_PATH, None);
    let stream = job.into_read_stream().await?;

    let response = client
        .http()
        .put(&url)
        .timeout(client.timeout())
        .header(CONTENT_LENGTH, declared_len)
        .header(ARCHIVE_NAME_HEADER, &archive_name)
        .body(reqwest::Body::wrap_stream(stream))
        .send()
        .await
        .map_err(|e| {
            let err = ProxyError::transport(GATEWAY_SERVICE, &e);
            error!(path = %url, archive = %archive_name, error = %err, "archive upload failed");
            err
        })?;

    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::transport(GATEWAY_SERVICE, &e))?;

    if status == 200 {
        Ok(())
    } else {
        error!(path = %url, archive = %archive_name, status, "could not upload archive");
        Err(ProxyError::Backend {
            status,
            body,
            path: url,
        })
    }
}

fn sink_error(err: std::io::Error) -> ProxyError {
    error!(error = %err, "upload sink write failed");
    ProxyError::Transport {
        service: UPLOAD_SERVICE,
        code: TransportCode::from_io_kind(err.kind()),
    }
}
