//! INI parsing onto [`ConfigFile`] defaults.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::file::{ConfigFile, ConfigFileError};

/// Parse an INI document. Missing keys keep their defaults; empty values
/// clear optional keys.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [catalog] section
    if let Some(section) = ini.section(Some("catalog")) {
        if let Some(v) = section.get("api_url") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("catalog", "api_url", v, "must not be empty"));
            }
            config.catalog.api_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = section.get("game_id") {
            config.catalog.game_id = optional(v)
                .map(|v| parse_number::<u64>("catalog", "game_id", v))
                .transpose()?;
        }
        if let Some(v) = section.get("api_key") {
            config.catalog.api_key = optional(v).map(str::to_string);
        }
        if let Some(v) = section.get("timeout") {
            let timeout = parse_number::<u64>("catalog", "timeout", v)?;
            if timeout == 0 {
                return Err(invalid("catalog", "timeout", v, "must be at least 1 second"));
            }
            config.catalog.timeout = timeout;
        }
    }

    // [paths] section
    if let Some(section) = ini.section(Some("paths")) {
        if let Some(v) = section.get("data_dir") {
            if let Some(v) = optional(v) {
                config.paths.data_dir = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("install_dir") {
            config.paths.install_dir = optional(v).map(expand_tilde);
        }
    }

    // [download] section
    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("max_attempts") {
            let attempts = parse_number::<u32>("download", "max_attempts", v)?;
            if attempts == 0 {
                return Err(invalid("download", "max_attempts", v, "must be at least 1"));
            }
            config.download.max_attempts = attempts;
        }
        if let Some(v) = section.get("progress_interval_ms") {
            let interval = parse_number::<u64>("download", "progress_interval_ms", v)?;
            if interval == 0 {
                return Err(invalid("download", "progress_interval_ms", v, "must be at least 1"));
            }
            config.download.progress_interval_ms = interval;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            if let Some(v) = optional(v) {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            if let Some(v) = optional(v) {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

/// Expand a leading `~` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn optional(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "expected a non-negative integer"))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
