//! Helpers shared across CLI commands.

use modsync::config::{ConfigFile, EngineConfig};
use modsync::install::InstallOrchestrator;
use tokio::runtime::Runtime;

use crate::error::CliError;

/// Load the configuration file and build the engine from it.
pub fn load_engine() -> Result<InstallOrchestrator, CliError> {
    let file = ConfigFile::load()?;
    let engine = EngineConfig::from_file(&file)?.build()?;
    Ok(engine)
}

/// Multi-threaded runtime for async commands.
pub fn runtime() -> Result<Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
}

/// Human-readable byte count (base 1024).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
