//! `modsync uninstall` - remove every installed build of a mod.

use modsync::model::ModId;

use super::common::{load_engine, runtime};
use crate::error::CliError;

pub fn run(mod_id: u64) -> Result<(), CliError> {
    let mod_id = ModId(mod_id);
    if mod_id.is_null() {
        return Err(CliError::Usage("mod id must be positive".to_string()));
    }

    let engine = load_engine()?;
    let report = runtime()?.block_on(engine.uninstall(mod_id))?;

    for path in &report.removed {
        println!("removed  {}", path.display());
    }
    for (path, reason) in &report.failed {
        println!("failed   {}: {}", path.display(), reason);
    }
    if report.removed.is_empty() && report.failed.is_empty() {
        println!("Mod {} had no installed builds", mod_id);
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(CliError::Usage(format!("mod {} was only partly removed", mod_id)))
    }
}
