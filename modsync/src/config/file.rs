//! Loading and saving `~/.modsync/config.ini`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::settings::{CatalogSettings, DownloadSettings, LoggingSettings, PathsSettings};

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors raised while reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("failed to write config file: {0}")]
    WriteError(String),

    #[error("invalid value for {section}.{key}: '{value}' ({reason})")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("failed to create config directory: {0}")]
    DirectoryError(#[from] io::Error),
}

/// In-memory form of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub catalog: CatalogSettings,
    pub paths: PathsSettings,
    pub download: DownloadSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_config_string())
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Write a default file if none exists yet, then load it.
    pub fn ensure_exists() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
            return Ok(config);
        }
        Self::load_from(&path)
    }
}

/// Directory holding the configuration file (`~/.modsync`).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".modsync"))
        .unwrap_or_else(super::defaults::fallback_directory)
}

/// Full path of the configuration file.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}
