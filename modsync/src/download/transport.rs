//! Byte transport for build archives.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Failure of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transfer was aborted through its cancellation token.
    #[error("transfer cancelled")]
    Cancelled,

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Connection or stream failure.
    #[error("network error: {0}")]
    Network(String),

    /// Writing the destination file failed.
    #[error("write failed: {0}")]
    Io(String),
}

/// Fetches a URL into a local file.
pub trait Transport: Send + Sync {
    /// Stream `url` into `dest`, truncating it first.
    ///
    /// `progress` is incremented as bytes are written. The transfer stops
    /// with [`TransportError::Cancelled`] once `cancel` fires. Returns the
    /// number of bytes written.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransportError>>;
}

/// Default connect timeout for archive downloads.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// [`Transport`] over HTTP.
///
/// No overall request timeout is set; archives can be large and progress is
/// observable through the counter.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish()
    }
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("modsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: &AtomicU64,
    ) -> Result<u64, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Network(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            written += chunk.len() as u64;
            progress.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }

        file.flush()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        trace!(url, bytes = written, "Transfer stream drained");
        Ok(written)
    }
}

impl Transport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransportError>> {
        async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(url, "Transfer aborted");
                    Err(TransportError::Cancelled)
                }
                result = self.stream_to_file(url, dest, &progress) => result,
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_transport_creation() {
        assert!(HttpTransport::new().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let transport = HttpTransport::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport
            .fetch(
                "http://127.0.0.1:9/never",
                &temp.path().join("a.part"),
                Arc::new(AtomicU64::new(0)),
                cancel,
            )
            .await;

        assert_eq!(result, Err(TransportError::Cancelled));
    }
}
