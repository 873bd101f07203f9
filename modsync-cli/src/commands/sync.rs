//! `modsync sync` - install the live build of each mod.

use modsync::install::ReconcileReport;
use modsync::model::ModId;

use super::common::{load_engine, runtime};
use crate::error::CliError;

pub fn run(mod_ids: Vec<u64>) -> Result<(), CliError> {
    let ids: Vec<ModId> = mod_ids.into_iter().map(ModId).collect();
    if ids.iter().any(ModId::is_null) {
        return Err(CliError::Usage("mod ids must be positive".to_string()));
    }

    let engine = load_engine()?;
    let report = runtime()?.block_on(engine.sync_mods(&ids))?;
    print_report(&report);

    if report.is_complete() {
        Ok(())
    } else {
        Err(CliError::Usage("sync finished with errors".to_string()))
    }
}

fn print_report(report: &ReconcileReport) {
    for key in &report.downloaded {
        println!("downloaded   {}", key);
    }
    for key in &report.installed_from_cache {
        println!("from cache   {}", key);
    }
    for key in &report.unresolvable {
        println!("unavailable  {}", key);
    }
    for (key, reason) in &report.failed {
        println!("failed       {}: {}", key, reason);
    }
    for id in &report.missing_mods {
        println!("not found    mod {}", id);
    }
    println!(
        "{} installed, {} up to date, {} problems",
        report.installed_count(),
        report.already_installed.len(),
        report.unresolvable.len() + report.failed.len() + report.missing_mods.len()
    );
}
