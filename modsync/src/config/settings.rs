//! Typed sections of the configuration file.

use std::path::PathBuf;

/// `[catalog]` section: how to reach the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    /// Base URL of the catalog API.
    pub api_url: String,
    /// Game whose mods are managed. Required before syncing.
    pub game_id: Option<u64>,
    /// API key sent with every request.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout: u64,
}

/// `[paths]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsSettings {
    /// Root of the local store (cached records, archives, staging).
    pub data_dir: PathBuf,
    /// Directory the game loads mods from. Required before installing.
    pub install_dir: Option<PathBuf>,
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Downloads attempted per build before giving up on a bad archive.
    pub max_attempts: u32,
    /// Progress sampling interval in milliseconds.
    pub progress_interval_ms: u64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}
