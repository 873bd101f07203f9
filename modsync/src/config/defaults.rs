//! Default values for every configuration key.

use std::path::PathBuf;

use super::settings::{CatalogSettings, DownloadSettings, LoggingSettings, PathsSettings};
use super::ConfigFile;

// =============================================================================
// Catalog defaults
// =============================================================================

/// Default base URL of the remote catalog API.
pub const DEFAULT_API_URL: &str = "https://api.mod.io/v1";

/// Default per-request timeout in seconds.
pub const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Download defaults
// =============================================================================

/// Default number of download attempts before an integrity failure is reported.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default interval between progress samples in milliseconds.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "modsync.log";

impl Default for ConfigFile {
    fn default() -> Self {
        let config_dir = super::file::config_directory();

        Self {
            catalog: CatalogSettings {
                api_url: DEFAULT_API_URL.to_string(),
                game_id: None,
                api_key: None,
                timeout: DEFAULT_CATALOG_TIMEOUT_SECS,
            },
            paths: PathsSettings {
                data_dir: config_dir.join("data"),
                install_dir: None,
            },
            download: DownloadSettings {
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            },
            logging: LoggingSettings {
                directory: config_dir.join("logs"),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}

/// Fallback directory when no home directory can be determined.
pub(super) fn fallback_directory() -> PathBuf {
    PathBuf::from(".modsync")
}
