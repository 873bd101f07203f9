//! `modsync install` - install one build with live progress.

use std::time::Duration;

use modsync::install::{InstallOrchestrator, InstallOutcome};
use modsync::model::{BuildId, ModId};

use super::common::{format_bytes, load_engine, runtime};
use crate::error::CliError;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub fn run(mod_id: u64, build_id: u64) -> Result<(), CliError> {
    let (mod_id, build_id) = (ModId(mod_id), BuildId(build_id));
    if mod_id.is_null() || build_id.0 == 0 {
        return Err(CliError::Usage("mod and build ids must be positive".to_string()));
    }

    let engine = load_engine()?;
    let outcome = runtime()?.block_on(install_with_progress(&engine, mod_id, build_id))?;
    match outcome {
        InstallOutcome::AlreadyInstalled => println!("{}_{} is already installed", mod_id, build_id),
        InstallOutcome::Installed { downloaded: true } => {
            println!("Installed {}_{}", mod_id, build_id)
        }
        InstallOutcome::Installed { downloaded: false } => {
            println!("Installed {}_{} from cache", mod_id, build_id)
        }
    }
    Ok(())
}

/// Run the install, printing download progress and cancelling on Ctrl-C.
async fn install_with_progress(
    engine: &InstallOrchestrator,
    mod_id: ModId,
    build_id: BuildId,
) -> Result<InstallOutcome, CliError> {
    let install = engine.ensure_installed(mod_id, build_id);
    tokio::pin!(install);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let mut interrupted = false;
    loop {
        tokio::select! {
            result = &mut install => return Ok(result?),
            _ = ticker.tick() => {
                if let Some(state) = engine.active_download(mod_id, build_id) {
                    if state.is_started() {
                        println!(
                            "  {:>5.1}%  {} / {}  {}/s",
                            state.progress() * 100.0,
                            format_bytes(state.bytes_downloaded()),
                            format_bytes(state.file_size()),
                            format_bytes(state.bytes_per_second() as u64),
                        );
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("Cancelling download...");
                engine.cancel(mod_id, build_id);
            }
        }
    }
}
