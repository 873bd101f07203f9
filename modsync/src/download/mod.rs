//! Download coordination for build archives.
//!
//! The [`DownloadCoordinator`] owns every in-flight transfer, at most one per
//! [`DownloadKey`]. Each transfer resolves a download locator (refreshing it
//! from the catalog when unknown or expired), proves write access with a
//! zero-length `.part` placeholder, streams the archive through a
//! [`Transport`] and renames the `.part` file into place.
//!
//! # Events
//!
//! ```text
//! start ──► Started ──► (progress samples)* ──► Succeeded | Failed
//! ```
//!
//! Exactly one terminal event fires per transfer. The coordinator never
//! retries; callers decide whether to start again.

mod coordinator;
mod state;
mod throughput;
mod transport;

pub use coordinator::{DownloadCoordinator, DEFAULT_SAMPLE_INTERVAL, EVENT_CHANNEL_CAPACITY};
pub use state::DownloadState;
pub use throughput::{ThroughputTracker, THROUGHPUT_SLOTS};
pub use transport::{HttpTransport, Transport, TransportError};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::model::DownloadKey;

/// Why a download failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// Build metadata could not be fetched.
    #[error("failed to resolve build metadata: {0}")]
    Catalog(#[from] CatalogError),

    /// The catalog did not provide a download URL.
    #[error("no download locator available for {0}")]
    MissingLocator(DownloadKey),

    /// Even the refreshed locator is already past its expiry.
    #[error("download locator for {0} has expired")]
    LocatorExpired(DownloadKey),

    /// A local file operation failed (placeholder, rename).
    #[error("local I/O error at {path}: {message}")]
    LocalIo { path: PathBuf, message: String },

    /// The transfer itself failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The download was cancelled.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub(crate) fn local_io(path: &Path, error: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.to_path_buf(),
            message: error.to_string(),
        }
    }
}

impl From<TransportError> for DownloadError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transfer(other.to_string()),
        }
    }
}

/// Notification published by the coordinator.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Bytes started flowing.
    Started {
        key: DownloadKey,
        state: Arc<DownloadState>,
    },
    /// The archive is at its target path.
    Succeeded {
        key: DownloadKey,
        state: Arc<DownloadState>,
    },
    /// The download ended without an archive.
    Failed {
        key: DownloadKey,
        error: DownloadError,
    },
}

impl DownloadEvent {
    pub fn key(&self) -> DownloadKey {
        match self {
            Self::Started { key, .. } | Self::Succeeded { key, .. } | Self::Failed { key, .. } => {
                *key
            }
        }
    }

    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started { .. })
    }
}

/// Path of the in-progress file for `target`.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
