//! Configuration for the sync engine.
//!
//! User settings live in `~/.modsync/config.ini`, loaded through
//! [`ConfigFile`]. [`EngineConfig`] is the validated form used to wire the
//! catalog client, download coordinator and install orchestrator together:
//!
//! ```ignore
//! let file = ConfigFile::load()?;
//! let engine = EngineConfig::from_file(&file)?.build()?;
//! let report = engine.sync_mods(&[]).await?;
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    DEFAULT_API_URL, DEFAULT_CATALOG_TIMEOUT_SECS, DEFAULT_LOG_FILE, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PROGRESS_INTERVAL_MS,
};
pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError, CONFIG_FILE_NAME};
pub use settings::{CatalogSettings, DownloadSettings, LoggingSettings, PathsSettings};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::{CatalogError, FetchPolicy, HttpCatalogClient, RemoteCatalog, ServerClock};
use crate::download::{DownloadCoordinator, HttpTransport, Transport, TransportError};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::install::{InstallOrchestrator, ZipArchiver};
use crate::store::LocalStore;

/// Failure to assemble an engine from its configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create catalog client: {0}")]
    Catalog(#[from] CatalogError),

    #[error("failed to create download transport: {0}")]
    Transport(#[from] TransportError),
}

/// Validated settings for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    api_url: String,
    game_id: u64,
    api_key: Option<String>,
    timeout: Duration,
    data_dir: PathBuf,
    install_dir: PathBuf,
    max_download_attempts: u32,
    sample_interval: Duration,
    fetch_policy: FetchPolicy,
}

impl EngineConfig {
    pub fn new(
        api_url: impl Into<String>,
        game_id: u64,
        data_dir: impl Into<PathBuf>,
        install_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            game_id,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_CATALOG_TIMEOUT_SECS),
            data_dir: data_dir.into(),
            install_dir: install_dir.into(),
            max_download_attempts: DEFAULT_MAX_ATTEMPTS,
            sample_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            fetch_policy: FetchPolicy::default(),
        }
    }

    /// Validate a loaded configuration file.
    ///
    /// Fails when the game id or install directory has not been set.
    pub fn from_file(file: &ConfigFile) -> Result<Self, ConfigFileError> {
        let game_id = file.catalog.game_id.ok_or_else(|| missing("catalog", "game_id"))?;
        let install_dir = file
            .paths
            .install_dir
            .clone()
            .ok_or_else(|| missing("paths", "install_dir"))?;

        let mut config = Self::new(
            file.catalog.api_url.clone(),
            game_id,
            file.paths.data_dir.clone(),
            install_dir,
        )
        .with_timeout(Duration::from_secs(file.catalog.timeout))
        .with_max_download_attempts(file.download.max_attempts)
        .with_sample_interval(Duration::from_millis(file.download.progress_interval_ms));

        if let Some(key) = &file.catalog.api_key {
            config = config.with_api_key(key.clone());
        }
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_download_attempts(mut self, attempts: u32) -> Self {
        self.max_download_attempts = attempts.max(1);
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn game_id(&self) -> u64 {
        self.game_id
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn max_download_attempts(&self) -> u32 {
        self.max_download_attempts
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// Wire up the production stack: HTTP catalog and transport, the local
    /// disk and zip archives.
    pub fn build(&self) -> Result<InstallOrchestrator, EngineError> {
        let clock = Arc::new(ServerClock::new());

        let mut client = HttpCatalogClient::new(&self.api_url, self.game_id, self.timeout)?
            .with_clock(Arc::clone(&clock));
        if let Some(key) = &self.api_key {
            client = client.with_api_key(key.clone());
        }
        let catalog: Arc<dyn RemoteCatalog> = Arc::new(client);

        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new()?);

        let downloads = Arc::new(
            DownloadCoordinator::new(
                Arc::clone(&catalog),
                transport,
                Arc::clone(&fs),
                Arc::clone(&clock),
            )
            .with_sample_interval(self.sample_interval),
        );

        tracing::debug!(
            api_url = %self.api_url,
            game_id = self.game_id,
            data_dir = %self.data_dir.display(),
            install_dir = %self.install_dir.display(),
            "Engine configured"
        );

        Ok(InstallOrchestrator::new(
            LocalStore::new(&self.data_dir, fs),
            &self.install_dir,
            catalog,
            downloads,
            Arc::new(ZipArchiver::new()),
            clock,
        )
        .with_max_download_attempts(self.max_download_attempts)
        .with_fetch_policy(self.fetch_policy.clone()))
    }
}

fn missing(section: &str, key: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: String::new(),
        reason: "required but not set".to_string(),
    }
}
