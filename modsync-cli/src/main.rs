//! modsync CLI - command-line interface to the modsync engine.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use modsync::config::ConfigFile;
use modsync::logging::{init_logging, LoggingGuard};

use commands::config::ConfigCommands;
use error::CliError;

#[derive(Parser)]
#[command(name = "modsync")]
#[command(version = modsync::VERSION)]
#[command(about = "Keep installed game mods in sync with a remote catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed builds
    List,

    /// Install a specific build of a mod
    Install {
        /// Mod id
        mod_id: u64,
        /// Build (modfile) id
        build_id: u64,
    },

    /// Remove every installed build of a mod
    Uninstall {
        /// Mod id
        mod_id: u64,
    },

    /// Install the live build of each mod (all known mods when none given)
    Sync {
        /// Mod ids to sync
        mod_ids: Vec<u64>,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Config(command) = cli.command {
        return commands::config::run(command);
    }

    let _guard = start_logging()?;
    tracing::debug!(version = modsync::VERSION, "modsync starting");
    match cli.command {
        Commands::List => commands::list::run(),
        Commands::Install { mod_id, build_id } => commands::install::run(mod_id, build_id),
        Commands::Uninstall { mod_id } => commands::uninstall::run(mod_id),
        Commands::Sync { mod_ids } => commands::sync::run(mod_ids),
        Commands::Config(_) => Ok(()),
    }
}

fn start_logging() -> Result<LoggingGuard, CliError> {
    let config = ConfigFile::load()?;
    init_logging(&config.logging.directory, &config.logging.file)
        .map_err(|e| CliError::LoggingInit(e.to_string()))
}
