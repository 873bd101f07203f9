//! Store path construction.
//!
//! Layout under the data root:
//!
//! ```text
//! <root>/mods/<mod_id>/profile.data
//! <root>/mods/<mod_id>/stats.data
//! <root>/mods/<mod_id>/binaries/<build_id>.data
//! <root>/mods/<mod_id>/binaries/<build_id>.zip
//! <root>/mods/<mod_id>/logos/<size>/<file_name>
//! <root>/mods/<mod_id>/gallery/<file_name>
//! ```
//!
//! These functions perform no I/O. Other components rely on the layout to
//! find content without scanning, so changes here must keep every entry of a
//! mod nested under [`mod_directory`].

use std::path::{Path, PathBuf};

use crate::model::{BuildId, ModId};

/// Directory holding all per-mod entries.
pub const MODS_DIR: &str = "mods";
/// Directory for scratch space (extraction staging).
pub const TEMP_DIR: &str = "temp";

const PROFILE_FILE: &str = "profile.data";
const STATS_FILE: &str = "stats.data";
const BINARIES_DIR: &str = "binaries";
const LOGOS_DIR: &str = "logos";
const GALLERY_DIR: &str = "gallery";

/// An addressable entity in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreEntry {
    /// Cached [`ModRecord`](crate::model::ModRecord).
    ModProfile(ModId),
    /// Cached [`ModStatistics`](crate::model::ModStatistics).
    ModStatistics(ModId),
    /// Cached [`BuildRecord`](crate::model::BuildRecord).
    BuildMetadata(ModId, BuildId),
    /// Downloaded binary archive of a build.
    BuildArchive(ModId, BuildId),
    /// Logo image at a named size (e.g. "320x180").
    Logo {
        mod_id: ModId,
        size: String,
        file_name: String,
    },
    /// Gallery image.
    GalleryImage { mod_id: ModId, file_name: String },
}

impl StoreEntry {
    /// The mod this entry belongs to.
    pub fn mod_id(&self) -> ModId {
        match self {
            Self::ModProfile(id) | Self::ModStatistics(id) => *id,
            Self::BuildMetadata(id, _) | Self::BuildArchive(id, _) => *id,
            Self::Logo { mod_id, .. } | Self::GalleryImage { mod_id, .. } => *mod_id,
        }
    }
}

/// Root of all per-mod entries.
pub fn mods_directory(root: &Path) -> PathBuf {
    root.join(MODS_DIR)
}

/// Directory holding every entry of one mod.
pub fn mod_directory(root: &Path, mod_id: ModId) -> PathBuf {
    mods_directory(root).join(mod_id.to_string())
}

/// Directory holding build metadata and archives of one mod.
pub fn binaries_directory(root: &Path, mod_id: ModId) -> PathBuf {
    mod_directory(root, mod_id).join(BINARIES_DIR)
}

/// Scratch directory used while extracting a build.
pub fn staging_directory(root: &Path, mod_id: ModId, build_id: BuildId) -> PathBuf {
    root.join(TEMP_DIR).join(format!("{}_{}", mod_id, build_id))
}

/// Full path of a store entry.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use modsync::model::{BuildId, ModId};
/// use modsync::store::{entry_path, StoreEntry};
///
/// let path = entry_path(
///     &PathBuf::from("/data"),
///     &StoreEntry::BuildArchive(ModId(42), BuildId(7)),
/// );
/// assert_eq!(path, PathBuf::from("/data/mods/42/binaries/7.zip"));
/// ```
pub fn entry_path(root: &Path, entry: &StoreEntry) -> PathBuf {
    match entry {
        StoreEntry::ModProfile(mod_id) => mod_directory(root, *mod_id).join(PROFILE_FILE),
        StoreEntry::ModStatistics(mod_id) => mod_directory(root, *mod_id).join(STATS_FILE),
        StoreEntry::BuildMetadata(mod_id, build_id) => {
            binaries_directory(root, *mod_id).join(format!("{}.data", build_id))
        }
        StoreEntry::BuildArchive(mod_id, build_id) => {
            binaries_directory(root, *mod_id).join(format!("{}.zip", build_id))
        }
        StoreEntry::Logo {
            mod_id,
            size,
            file_name,
        } => mod_directory(root, *mod_id)
            .join(LOGOS_DIR)
            .join(sanitize_component(size))
            .join(sanitize_component(file_name)),
        StoreEntry::GalleryImage { mod_id, file_name } => mod_directory(root, *mod_id)
            .join(GALLERY_DIR)
            .join(sanitize_component(file_name)),
    }
}

/// Strip path separators and parent references from a caller-supplied name.
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Checks that every entry kind of `probe` is nested under
/// `mods/<probe>/`, which is what listing `mods/` to enumerate cached mods
/// depends on.
pub fn layout_is_consistent(root: &Path) -> bool {
    let probe = ModId(1);
    let mod_dir = mod_directory(root, probe);
    if mod_dir.parent() != Some(mods_directory(root).as_path()) {
        return false;
    }

    let entries = [
        StoreEntry::ModProfile(probe),
        StoreEntry::ModStatistics(probe),
        StoreEntry::BuildMetadata(probe, BuildId(1)),
        StoreEntry::BuildArchive(probe, BuildId(1)),
        StoreEntry::Logo {
            mod_id: probe,
            size: "original".to_string(),
            file_name: "logo.png".to_string(),
        },
        StoreEntry::GalleryImage {
            mod_id: probe,
            file_name: "1.png".to_string(),
        },
    ];
    entries
        .iter()
        .all(|entry| entry_path(root, entry).starts_with(&mod_dir))
}
