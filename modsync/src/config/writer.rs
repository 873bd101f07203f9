//! Serialization of [`ConfigFile`] into the commented INI written to disk.

use std::path::Path;

use super::file::ConfigFile;

impl ConfigFile {
    /// Render the configuration as a commented INI document.
    pub fn to_config_string(&self) -> String {
        to_config_string(self)
    }
}

fn to_config_string(config: &ConfigFile) -> String {
    let game_id = config
        .catalog
        .game_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    let api_key = config.catalog.api_key.as_deref().unwrap_or("");
    let install_dir = config
        .paths
        .install_dir
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();

    format!(
        r#"[catalog]
; Base URL of the mod catalog API
api_url = {}
; Numeric id of the game whose mods are managed (required)
game_id = {}
; API key sent with every catalog request
api_key = {}
; Per-request timeout in seconds
timeout = {}

[paths]
; Local store: cached mod records, build archives and staging area
data_dir = {}
; Directory the game loads mods from (required)
; Each build is installed as <mod_id>_<build_id>/
install_dir = {}

[download]
; Download attempts per build before a corrupt archive is reported
max_attempts = {}
; Progress sampling interval in milliseconds
progress_interval_ms = {}

[logging]
; Log output directory (log file is cleared on each run)
directory = {}
file = {}
"#,
        config.catalog.api_url,
        game_id,
        api_key,
        config.catalog.timeout,
        path_to_string(&config.paths.data_dir),
        install_dir,
        config.download.max_attempts,
        config.download.progress_interval_ms,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Display a path with the home directory collapsed to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
