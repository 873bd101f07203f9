//! Discovery of installed builds from the install directory.
//!
//! An install directory named `<mod_id>_<build_id>` belongs to that build.
//! Anything else is drop-in content added by the user and is reported with
//! null ids so automatic uninstall never touches it.

use std::io;
use std::path::{Path, PathBuf};

use crate::fs::FileSystem;
use crate::model::{BuildId, ModId};

/// One directory under the install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBuild {
    /// Null for drop-ins.
    pub mod_id: ModId,
    /// Null for drop-ins.
    pub build_id: BuildId,
    pub path: PathBuf,
}

impl InstalledBuild {
    /// Returns true for directories not created by the engine.
    pub fn is_drop_in(&self) -> bool {
        self.mod_id.is_null()
    }
}

/// Directory name for an installed build.
pub fn install_dir_name(mod_id: ModId, build_id: BuildId) -> String {
    format!("{}_{}", mod_id, build_id)
}

/// Parse an install directory name into its ids.
///
/// Both halves must be positive decimal integers; anything else is `None`.
///
/// ```
/// use modsync::install::parse_install_dir_name;
/// use modsync::model::{BuildId, ModId};
///
/// assert_eq!(parse_install_dir_name("42_7"), Some((ModId(42), BuildId(7))));
/// assert_eq!(parse_install_dir_name("My Textures"), None);
/// ```
pub fn parse_install_dir_name(name: &str) -> Option<(ModId, BuildId)> {
    let (mod_part, build_part) = name.split_once('_')?;
    let mod_id = mod_part.parse::<ModId>().ok()?;
    let build_id = build_part.parse::<BuildId>().ok()?;
    Some((mod_id, build_id))
}

/// Classify a directory path under the install root.
pub fn classify(path: PathBuf) -> InstalledBuild {
    let ids = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_install_dir_name);

    let (mod_id, build_id) = ids.unwrap_or((ModId::NULL, BuildId::NULL));
    InstalledBuild {
        mod_id,
        build_id,
        path,
    }
}

/// List every directory under `install_root`, drop-ins included.
pub async fn list_installed(
    fs: &dyn FileSystem,
    install_root: &Path,
) -> io::Result<Vec<InstalledBuild>> {
    let dirs = fs.list_directories(install_root).await?;
    Ok(dirs.into_iter().map(classify).collect())
}
