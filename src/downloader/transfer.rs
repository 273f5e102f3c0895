//! Transfer primitive: stream one URL to one file.

use crate::error::TransferError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressReporter;

/// What to fetch and where to put it
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Audio URL
    pub url: &'a str,
    /// Destination file (parent directory exists)
    pub dest: &'a Path,
    /// Size advertised by the feed, used for progress when the server sends no length
    pub expected_size: Option<u64>,
}

/// Result of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Bytes written to `dest`
    pub bytes_written: u64,
    /// Content-Type reported by the server
    pub content_type: Option<String>,
}

/// Executes a single download attempt
///
/// Implementations stream bytes to `dest`, report progress, and return
/// [`TransferError::Cancelled`] promptly once `cancel` fires. They never retry
/// and never delete partial files; the engine does both.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Download `request.url` into `request.dest`
    async fn download(
        &self,
        request: TransferRequest<'_>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> std::result::Result<TransferOutcome, TransferError>;
}

/// HTTP(S) transfer over reqwest
#[derive(Clone)]
pub struct HttpTransfer {
    client: reqwest::Client,
}

impl HttpTransfer {
    /// Build a client with the given User-Agent
    pub fn new(user_agent: &str) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn download(
        &self,
        request: TransferRequest<'_>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> std::result::Result<TransferOutcome, TransferError> {
        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            response = self.client.get(request.url).send() => {
                response.map_err(|e| TransferError::Network(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::BadStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length().filter(|len| *len > 0);
        let total = content_length.or(request.expected_size);

        let mut file = tokio::fs::File::create(request.dest)
            .await
            .map_err(|e| write_error(e, 0))?;
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                chunk = response.chunk() => chunk.map_err(|e| TransferError::Network(e.to_string()))?,
            };
            let Some(chunk) = chunk else {
                break;
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| write_error(e, written))?;
            written += chunk.len() as u64;
            progress.update_bytes(written, total);
        }

        file.flush().await.map_err(|e| write_error(e, written))?;

        if let Some(expected) = content_length
            && written < expected
        {
            return Err(TransferError::Network(format!(
                "connection closed after {} of {} bytes",
                written, expected
            )));
        }

        tracing::debug!(url = request.url, bytes = written, "Transfer finished");

        Ok(TransferOutcome {
            bytes_written: written,
            content_type,
        })
    }
}

fn write_error(error: std::io::Error, written: u64) -> TransferError {
    if error.kind() == std::io::ErrorKind::StorageFull {
        TransferError::StorageFull { written }
    } else {
        TransferError::Io(error)
    }
}
