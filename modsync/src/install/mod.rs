//! Installation of build archives into the install directory.
//!
//! The [`InstallOrchestrator`] drives each mod through:
//!
//! ```text
//! CheckInstalled ──► CheckCachedArchive ──► (Download ──►) Install ──► Notify
//! ```
//!
//! Installed builds live at `<install_root>/<mod_id>_<build_id>/`. Installing
//! a build evicts every other build of the same mod; drop-in directories
//! (names that do not parse as `<mod_id>_<build_id>`) are never touched.
//!
//! Eviction happens before the new build is moved into place. A crash between
//! the two steps leaves the mod uninstalled until the next reconcile.

mod extractor;
mod installed;
mod orchestrator;
mod reconcile;

pub use extractor::{ArchiveExtractor, ExtractError, ZipArchiver};
pub use installed::{
    classify, install_dir_name, list_installed, parse_install_dir_name, InstalledBuild,
};
pub use orchestrator::{
    InstallOrchestrator, InstallOutcome, UninstallReport, DEFAULT_MAX_DOWNLOAD_ATTEMPTS,
};
pub use reconcile::ReconcileReport;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::download::DownloadError;
use crate::model::{DownloadKey, ModId};
use crate::store::StoreError;

/// Why an install step failed.
#[derive(Debug, Error)]
pub enum InstallError {
    /// Disk operation failed.
    #[error("local I/O error at {path}: {message}")]
    LocalIo { path: PathBuf, message: String },

    /// The archive could not be extracted.
    #[error("failed to extract archive for {key}: {source}")]
    Extraction {
        key: DownloadKey,
        #[source]
        source: ExtractError,
    },

    /// The downloaded archive does not match its build record.
    #[error("archive for {key} failed verification (expected {expected_size} bytes, got {actual_size})")]
    Integrity {
        key: DownloadKey,
        expected_size: u64,
        actual_size: u64,
    },

    /// The download failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Catalog lookup failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The local store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InstallError {
    pub(crate) fn local_io(path: &Path, error: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.to_path_buf(),
            message: error.to_string(),
        }
    }
}

/// Result type for install operations.
pub type InstallResult<T> = Result<T, InstallError>;

/// Notification published after install state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// A build is now installed.
    Installed { key: DownloadKey },
    /// All builds of a mod were removed (or an attempt was made).
    Uninstalled { mod_id: ModId, complete: bool },
}
