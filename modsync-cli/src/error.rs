//! CLI error handling with user-friendly messages.
//!
//! Every command returns [`CliError`]; `main` prints it and exits with
//! status 1.

use std::fmt;
use std::process;

use modsync::config::{config_file_path, ConfigFileError, EngineError};
use modsync::install::InstallError;
use modsync::store::StoreError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid command-line input
    Usage(String),
    /// Configuration file could not be read, written or validated
    Config(ConfigFileError),
    /// Failed to assemble the engine
    Engine(EngineError),
    /// An install, uninstall or sync failed
    Install(InstallError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(ConfigFileError::InvalidValue { .. }) = self {
            eprintln!();
            eprintln!("Edit {} or run:", config_file_path().display());
            eprintln!("  modsync config init");
            eprintln!("to write a fresh configuration file.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Engine(e) => write!(f, "Failed to start engine: {}", e),
            CliError::Install(e) => write!(f, "{}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Engine(e) => Some(e),
            CliError::Install(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}

impl From<InstallError> for CliError {
    fn from(e: InstallError) -> Self {
        CliError::Install(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Install(InstallError::Store(e))
    }
}
