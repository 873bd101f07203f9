//! Local store for cached metadata, build archives and media assets.
//!
//! Entries are addressed by [`StoreEntry`] and live at deterministic paths
//! (see [`path`]). Metadata entries are JSON; archives and media are raw
//! bytes.
//!
//! Reads are self-healing: a metadata file that fails to deserialize is
//! deleted and reported as absent, so a corrupt cache never blocks a sync.

mod path;

pub use path::{
    binaries_directory, entry_path, layout_is_consistent, mod_directory, mods_directory,
    staging_directory, StoreEntry, MODS_DIR, TEMP_DIR,
};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::fs::FileSystem;
use crate::model::{BuildRecord, ModId, ModRecord};

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path layout no longer nests mod entries under `mods/<id>/`.
    #[error("store layout is inconsistent: entries are not nested under {0}")]
    LayoutMismatch(PathBuf),

    /// Serialization of a value failed.
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Disk I/O failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of comparing a cached archive against its build record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCheck {
    /// Archive present with the expected size and (if known) hash.
    Valid,
    /// No archive on disk.
    Missing,
    /// Archive present but size or hash differs.
    Mismatch,
}

/// Persistent cache of mod metadata and binaries.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("root", &self.root)
            .finish()
    }
}

impl LocalStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem used by the store.
    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Path of an entry. Pure; performs no I/O.
    pub fn path_for(&self, entry: &StoreEntry) -> PathBuf {
        entry_path(&self.root, entry)
    }

    /// Serialize `value` as JSON and write it to the entry's path.
    pub async fn save<T: Serialize>(&self, entry: &StoreEntry, value: &T) -> StoreResult<()> {
        let path = self.path_for(entry);
        let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialize {
            path: path.clone(),
            source: e,
        })?;
        self.write(&path, &data).await
    }

    /// Load and deserialize an entry.
    ///
    /// Returns `None` when the entry is missing or unreadable. A file that
    /// exists but does not deserialize is deleted.
    pub async fn load<T: DeserializeOwned>(&self, entry: &StoreEntry) -> Option<T> {
        let path = self.path_for(entry);
        if !self.fs.file_exists(&path).await {
            return None;
        }

        let data = match self.fs.read_file(&path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read store entry");
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt store entry, deleting"
                );
                if let Err(e) = self.fs.delete_file(&path).await {
                    error!(path = %path.display(), error = %e, "Failed to delete corrupt entry");
                }
                None
            }
        }
    }

    /// Write raw bytes (media assets) to an entry.
    pub async fn save_bytes(&self, entry: &StoreEntry, data: &[u8]) -> StoreResult<()> {
        let path = self.path_for(entry);
        self.write(&path, data).await
    }

    /// Read raw bytes of an entry, `None` if missing or unreadable.
    pub async fn load_bytes(&self, entry: &StoreEntry) -> Option<Vec<u8>> {
        let path = self.path_for(entry);
        if !self.fs.file_exists(&path).await {
            return None;
        }
        self.fs.read_file(&path).await.ok()
    }

    /// Delete a single entry.
    pub async fn delete(&self, entry: &StoreEntry) -> StoreResult<()> {
        let path = self.path_for(entry);
        self.fs
            .delete_file(&path)
            .await
            .map_err(|e| StoreError::Io { path, source: e })
    }

    /// Delete every cached entry of a mod.
    pub async fn delete_mod(&self, mod_id: ModId) -> StoreResult<()> {
        let path = mod_directory(&self.root, mod_id);
        debug!(mod_id = %mod_id, path = %path.display(), "Deleting cached mod data");
        self.fs
            .delete_directory(&path)
            .await
            .map_err(|e| StoreError::Io { path, source: e })
    }

    /// Ids of all mods with a directory under `mods/`.
    ///
    /// Directories whose names are not positive integers are skipped.
    pub async fn cached_mod_ids(&self) -> StoreResult<Vec<ModId>> {
        if !layout_is_consistent(&self.root) {
            let dir = mods_directory(&self.root);
            error!(path = %dir.display(), "Store layout check failed, refusing to enumerate");
            return Err(StoreError::LayoutMismatch(dir));
        }

        let dir = mods_directory(&self.root);
        let subdirs = self
            .fs
            .list_directories(&dir)
            .await
            .map_err(|e| StoreError::Io {
                path: dir.clone(),
                source: e,
            })?;

        let mut ids: Vec<ModId> = subdirs
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Load every cached mod profile.
    pub async fn load_all_profiles(&self) -> StoreResult<Vec<ModRecord>> {
        let mut profiles = Vec::new();
        for mod_id in self.cached_mod_ids().await? {
            if let Some(profile) = self.load(&StoreEntry::ModProfile(mod_id)).await {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }

    /// Path of the cached archive for a build.
    pub fn archive_path(&self, build: &BuildRecord) -> PathBuf {
        self.path_for(&StoreEntry::BuildArchive(build.mod_id, build.build_id))
    }

    /// Compare the cached archive of `build` with its expected size and hash.
    pub async fn check_archive(&self, build: &BuildRecord) -> ArchiveCheck {
        let path = self.archive_path(build);
        if !self.fs.file_exists(&path).await {
            return ArchiveCheck::Missing;
        }

        match self.fs.size_and_hash(&path).await {
            Ok((size, hash)) => {
                if archive_matches(build, size, &hash) {
                    ArchiveCheck::Valid
                } else {
                    debug!(
                        key = %build.key(),
                        expected_size = build.file_size,
                        actual_size = size,
                        "Cached archive does not match build"
                    );
                    ArchiveCheck::Mismatch
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to hash cached archive");
                ArchiveCheck::Mismatch
            }
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> StoreResult<()> {
        self.fs
            .write_file(path, data)
            .await
            .map_err(|e| StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

/// Returns true if `size`/`hash` satisfy the build's expectations.
///
/// The hash is compared case-insensitively and only when the build has one.
pub fn archive_matches(build: &BuildRecord, size: u64, hash: &str) -> bool {
    if size != build.file_size {
        return false;
    }
    match &build.file_hash {
        Some(expected) if !expected.is_empty() => expected.eq_ignore_ascii_case(hash),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::model::{BuildId, ModStatistics};
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> LocalStore {
        LocalStore::new(temp.path(), Arc::new(LocalFileSystem::new()))
    }

    fn profile(id: u64) -> ModRecord {
        ModRecord {
            mod_id: ModId(id),
            name: format!("Mod {}", id),
            summary: String::new(),
            date_updated: 0,
            current_build: None,
            stats: None,
        }
    }

    fn build(size: u64, hash: Option<&str>) -> BuildRecord {
        BuildRecord {
            mod_id: ModId(42),
            build_id: BuildId(7),
            file_name: "build.zip".to_string(),
            version: None,
            file_size: size,
            file_hash: hash.map(str::to_string),
            locator: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_profile() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let entry = StoreEntry::ModProfile(ModId(5));

        store.save(&entry, &profile(5)).await.unwrap();

        let loaded: ModRecord = store.load(&entry).await.unwrap();
        assert_eq!(loaded, profile(5));
        assert!(temp.path().join("mods/5/profile.data").exists());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let loaded: Option<ModStatistics> = store.load(&StoreEntry::ModStatistics(ModId(1))).await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_deleted() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let path = temp.path().join("mods/9/profile.data");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        let loaded: Option<ModRecord> = store.load(&StoreEntry::ModProfile(ModId(9))).await;

        assert!(loaded.is_none());
        assert!(!path.exists(), "corrupt file should be removed");
    }

    #[tokio::test]
    async fn test_bytes_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let entry = StoreEntry::Logo {
            mod_id: ModId(3),
            size: "thumb".to_string(),
            file_name: "logo.png".to_string(),
        };

        store.save_bytes(&entry, &[1, 2, 3]).await.unwrap();
        assert_eq!(store.load_bytes(&entry).await.unwrap(), vec![1, 2, 3]);

        store.delete(&entry).await.unwrap();
        assert!(store.load_bytes(&entry).await.is_none());
    }

    #[tokio::test]
    async fn test_cached_mod_ids_skips_unknown_dirs() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store
            .save(&StoreEntry::ModProfile(ModId(20)), &profile(20))
            .await
            .unwrap();
        store
            .save(&StoreEntry::ModProfile(ModId(3)), &profile(3))
            .await
            .unwrap();
        std::fs::create_dir_all(temp.path().join("mods/not-a-mod")).unwrap();

        let ids = store.cached_mod_ids().await.unwrap();
        assert_eq!(ids, vec![ModId(3), ModId(20)]);

        let profiles = store.load_all_profiles().await.unwrap();
        assert_eq!(profiles.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_mod() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store
            .save(&StoreEntry::ModProfile(ModId(8)), &profile(8))
            .await
            .unwrap();

        store.delete_mod(ModId(8)).await.unwrap();

        assert!(!temp.path().join("mods/8").exists());
        assert!(store.cached_mod_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_archive() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let data = vec![0u8; 1000];
        let (_, hash) = {
            let probe = temp.path().join("probe");
            std::fs::write(&probe, &data).unwrap();
            crate::fs::sha256_file(&probe).unwrap()
        };

        let expected = build(1000, Some(&hash));
        assert_eq!(store.check_archive(&expected).await, ArchiveCheck::Missing);

        let path = store.archive_path(&expected);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, &data).unwrap();
        assert_eq!(store.check_archive(&expected).await, ArchiveCheck::Valid);

        std::fs::write(&path, vec![0u8; 900]).unwrap();
        assert_eq!(store.check_archive(&expected).await, ArchiveCheck::Mismatch);
    }

    #[test]
    fn test_archive_matches() {
        assert!(archive_matches(&build(1000, Some("abc")), 1000, "abc"));
        assert!(archive_matches(&build(1000, Some("ABC")), 1000, "abc"));
        assert!(archive_matches(&build(1000, None), 1000, "anything"));
        assert!(archive_matches(&build(1000, Some("")), 1000, "anything"));
        assert!(!archive_matches(&build(1000, Some("abc")), 900, "abc"));
        assert!(!archive_matches(&build(1000, Some("abc")), 1000, "abd"));
    }
}
