//! `modsync list` - show installed builds.

use modsync::install::{InstallOrchestrator, InstalledBuild};
use modsync::model::ModRecord;
use modsync::store::StoreEntry;

use super::common::{load_engine, runtime};
use crate::error::CliError;

pub fn run() -> Result<(), CliError> {
    let engine = load_engine()?;
    runtime()?.block_on(list(&engine))
}

async fn list(engine: &InstallOrchestrator) -> Result<(), CliError> {
    let installed = engine.list_installed().await?;
    if installed.is_empty() {
        println!("No mods installed in {}", engine.install_root().display());
        return Ok(());
    }

    println!("{:<10} {:<10} NAME", "MOD", "BUILD");
    for build in &installed {
        let name = describe(engine, build).await;
        if build.is_drop_in() {
            println!("{:<10} {:<10} {}", "-", "-", name);
        } else {
            println!("{:<10} {:<10} {}", build.mod_id, build.build_id, name);
        }
    }
    Ok(())
}

/// Cached profile name, or the directory name when none is cached.
async fn describe(engine: &InstallOrchestrator, build: &InstalledBuild) -> String {
    let dir_name = build
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if build.is_drop_in() {
        return format!("{} (drop-in)", dir_name);
    }
    let profile: Option<ModRecord> = engine
        .store()
        .load(&StoreEntry::ModProfile(build.mod_id))
        .await;
    match profile {
        Some(profile) => profile.name,
        None => dir_name,
    }
}
