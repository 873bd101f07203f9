//! The install orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::installed::{install_dir_name, list_installed, InstalledBuild};
use super::{ArchiveExtractor, InstallError, InstallEvent, InstallResult};
use crate::catalog::{FetchPolicy, RemoteCatalog, ServerClock};
use crate::download::{DownloadCoordinator, DownloadEvent, DownloadState};
use crate::fs::FileSystem;
use crate::model::{BuildId, BuildRecord, DownloadKey, ModId, ModRecord};
use crate::store::{archive_matches, staging_directory, ArchiveCheck, LocalStore, StoreEntry};

/// Downloads attempted per install before an integrity failure is final.
pub const DEFAULT_MAX_DOWNLOAD_ATTEMPTS: u32 = 2;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What [`InstallOrchestrator::ensure_installed`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The build directory already existed; nothing was changed.
    AlreadyInstalled,
    /// The build was installed, from a fresh download or the cached archive.
    Installed { downloaded: bool },
}

/// Result of [`InstallOrchestrator::uninstall`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub mod_id: ModId,
    /// Install directories that were deleted.
    pub removed: Vec<PathBuf>,
    /// Paths that could not be deleted, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl UninstallReport {
    /// Returns true if nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ensures builds are installed, current and evicted when superseded.
///
/// Installs for a given orchestrator should be driven one at a time (the
/// batch operations do this); extraction staging is keyed per build, but
/// eviction assumes nothing else is moving the same mod's directories.
pub struct InstallOrchestrator {
    pub(super) store: LocalStore,
    pub(super) install_root: PathBuf,
    pub(super) fs: Arc<dyn FileSystem>,
    pub(super) catalog: Arc<dyn RemoteCatalog>,
    pub(super) downloads: Arc<DownloadCoordinator>,
    pub(super) extractor: Arc<dyn ArchiveExtractor>,
    pub(super) clock: Arc<ServerClock>,
    pub(super) fetch_policy: FetchPolicy,
    events: broadcast::Sender<InstallEvent>,
    max_download_attempts: u32,
}

impl std::fmt::Debug for InstallOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallOrchestrator")
            .field("store", &self.store)
            .field("install_root", &self.install_root)
            .field("max_download_attempts", &self.max_download_attempts)
            .finish()
    }
}

impl InstallOrchestrator {
    pub fn new(
        store: LocalStore,
        install_root: impl Into<PathBuf>,
        catalog: Arc<dyn RemoteCatalog>,
        downloads: Arc<DownloadCoordinator>,
        extractor: Arc<dyn ArchiveExtractor>,
        clock: Arc<ServerClock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            fs: Arc::clone(store.filesystem()),
            store,
            install_root: install_root.into(),
            catalog,
            downloads,
            extractor,
            clock,
            fetch_policy: FetchPolicy::default(),
            events,
            max_download_attempts: DEFAULT_MAX_DOWNLOAD_ATTEMPTS,
        }
    }

    /// Set how many times a build is downloaded before an integrity
    /// mismatch is reported.
    pub fn with_max_download_attempts(mut self, attempts: u32) -> Self {
        self.max_download_attempts = attempts.max(1);
        self
    }

    /// Set the pagination and retry policy for catalog queries.
    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn downloads(&self) -> &Arc<DownloadCoordinator> {
        &self.downloads
    }

    /// Path at which a build is (or would be) installed.
    pub fn install_path(&self, mod_id: ModId, build_id: BuildId) -> PathBuf {
        self.install_root.join(install_dir_name(mod_id, build_id))
    }

    /// Subscribe to install and uninstall events.
    pub fn subscribe_installs(&self) -> broadcast::Receiver<InstallEvent> {
        self.events.subscribe()
    }

    /// Subscribe to download events.
    pub fn subscribe_downloads(&self) -> broadcast::Receiver<DownloadEvent> {
        self.downloads.subscribe()
    }

    /// Every directory under the install root, drop-ins included.
    pub async fn list_installed(&self) -> InstallResult<Vec<InstalledBuild>> {
        list_installed(self.fs.as_ref(), &self.install_root)
            .await
            .map_err(|e| InstallError::local_io(&self.install_root, e))
    }

    /// The active download for a build, if any.
    pub fn active_download(&self, mod_id: ModId, build_id: BuildId) -> Option<Arc<DownloadState>> {
        self.downloads
            .active_download(DownloadKey::new(mod_id, build_id))
    }

    /// Cancel an active download. Returns false if none was active.
    pub fn cancel(&self, mod_id: ModId, build_id: BuildId) -> bool {
        self.downloads.cancel(DownloadKey::new(mod_id, build_id))
    }

    /// Make sure build `build_id` of `mod_id` is installed.
    ///
    /// An existing install directory short-circuits with no filesystem
    /// mutation. Otherwise the build record comes from the cached profile
    /// when it names this build, then from cached build metadata, then from
    /// the catalog.
    pub async fn ensure_installed(
        &self,
        mod_id: ModId,
        build_id: BuildId,
    ) -> InstallResult<InstallOutcome> {
        if self.is_installed(mod_id, build_id).await {
            debug!(mod_id = %mod_id, build_id = %build_id, "Build already installed");
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let build = self.resolve_build(mod_id, build_id).await?;
        self.ensure_build_installed(&build).await
    }

    /// Make sure `build` is installed, downloading it when no valid cached
    /// archive exists.
    pub async fn ensure_build_installed(&self, build: &BuildRecord) -> InstallResult<InstallOutcome> {
        let key = build.key();
        if self.is_installed(build.mod_id, build.build_id).await {
            debug!(key = %key, "Build already installed");
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let archive = self.store.archive_path(build);
        let downloaded = match self.store.check_archive(build).await {
            ArchiveCheck::Valid => {
                debug!(key = %key, "Installing from cached archive");
                false
            }
            check => {
                if check == ArchiveCheck::Mismatch {
                    info!(key = %key, "Cached archive is stale, downloading again");
                    self.discard_archive(&archive).await;
                }
                self.download_verified(build, &archive).await?;
                true
            }
        };

        self.install_archive(build, &archive).await?;
        Ok(InstallOutcome::Installed { downloaded })
    }

    /// Remove every installed build of `mod_id` and its cached store
    /// entries.
    ///
    /// Individual deletion failures are collected in the report rather than
    /// aborting; the caller decides whether a partial uninstall is
    /// acceptable. Drop-ins are never targeted.
    pub async fn uninstall(&self, mod_id: ModId) -> InstallResult<UninstallReport> {
        let mut report = UninstallReport {
            mod_id,
            ..Default::default()
        };
        if mod_id.is_null() {
            warn!("Refusing to uninstall content without a mod id");
            return Ok(report);
        }

        for key in self.downloads.active_keys() {
            if key.mod_id == mod_id {
                self.downloads.cancel(key);
            }
        }

        for installed in self.list_installed().await? {
            if installed.is_drop_in() || installed.mod_id != mod_id {
                continue;
            }
            match self.fs.delete_directory(&installed.path).await {
                Ok(()) => {
                    debug!(path = %installed.path.display(), "Removed install directory");
                    report.removed.push(installed.path);
                }
                Err(e) => {
                    warn!(path = %installed.path.display(), error = %e, "Failed to remove install directory");
                    report.failed.push((installed.path, e.to_string()));
                }
            }
        }

        if let Err(e) = self.store.delete_mod(mod_id).await {
            warn!(mod_id = %mod_id, error = %e, "Failed to remove cached mod data");
            report
                .failed
                .push((crate::store::mod_directory(self.store.root(), mod_id), e.to_string()));
        }

        info!(
            mod_id = %mod_id,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Mod uninstalled"
        );
        let _ = self.events.send(InstallEvent::Uninstalled {
            mod_id,
            complete: report.is_complete(),
        });
        Ok(report)
    }

    pub(super) async fn is_installed(&self, mod_id: ModId, build_id: BuildId) -> bool {
        self.fs
            .directory_exists(&self.install_path(mod_id, build_id))
            .await
    }

    async fn resolve_build(&self, mod_id: ModId, build_id: BuildId) -> InstallResult<BuildRecord> {
        let profile: Option<ModRecord> = self.store.load(&StoreEntry::ModProfile(mod_id)).await;
        if let Some(build) = profile
            .and_then(|p| p.current_build)
            .filter(|b| b.build_id == build_id)
        {
            return Ok(build);
        }

        if let Some(build) = self
            .store
            .load::<BuildRecord>(&StoreEntry::BuildMetadata(mod_id, build_id))
            .await
        {
            return Ok(build);
        }

        debug!(mod_id = %mod_id, build_id = %build_id, "Build not cached, asking catalog");
        let build = self.catalog.get_build_metadata(mod_id, build_id).await?;
        if let Err(e) = self
            .store
            .save(&StoreEntry::BuildMetadata(mod_id, build_id), &build)
            .await
        {
            warn!(key = %build.key(), error = %e, "Failed to cache build metadata");
        }
        Ok(build)
    }

    /// Download `build` to `archive` and verify it, retrying on mismatch.
    async fn download_verified(&self, build: &BuildRecord, archive: &Path) -> InstallResult<()> {
        let key = build.key();
        let mut attempt = 1;

        loop {
            let state = self
                .downloads
                .start_with_build(build.clone(), archive.to_path_buf());
            state.wait().await?;

            let (size, hash) = self
                .fs
                .size_and_hash(archive)
                .await
                .map_err(|e| InstallError::local_io(archive, e))?;
            if archive_matches(build, size, &hash) {
                return Ok(());
            }

            warn!(
                key = %key,
                attempt,
                expected_size = build.file_size,
                actual_size = size,
                "Downloaded archive failed verification"
            );
            self.discard_archive(archive).await;

            if attempt >= self.max_download_attempts {
                return Err(InstallError::Integrity {
                    key,
                    expected_size: build.file_size,
                    actual_size: size,
                });
            }
            attempt += 1;
        }
    }

    /// Extract, evict superseded builds, move into place, drop the archive.
    async fn install_archive(&self, build: &BuildRecord, archive: &Path) -> InstallResult<()> {
        let key = build.key();
        let staging = staging_directory(self.store.root(), build.mod_id, build.build_id);

        // Leftovers from an interrupted install
        self.fs
            .delete_directory(&staging)
            .await
            .map_err(|e| InstallError::local_io(&staging, e))?;

        if let Err(source) = self.extractor.extract_all(archive, &staging).await {
            if let Err(e) = self.fs.delete_directory(&staging).await {
                warn!(path = %staging.display(), error = %e, "Failed to clean up staging directory");
            }
            return Err(InstallError::Extraction { key, source });
        }

        self.evict_other_builds(build.mod_id, build.build_id).await?;

        let dest = self.install_path(build.mod_id, build.build_id);
        self.fs
            .move_directory(&staging, &dest)
            .await
            .map_err(|e| InstallError::local_io(&dest, e))?;

        self.discard_archive(archive).await;

        info!(key = %key, path = %dest.display(), "Build installed");
        let _ = self.events.send(InstallEvent::Installed { key });
        Ok(())
    }

    async fn evict_other_builds(&self, mod_id: ModId, keep: BuildId) -> InstallResult<()> {
        for installed in self.list_installed().await? {
            if installed.is_drop_in() || installed.mod_id != mod_id || installed.build_id == keep {
                continue;
            }
            debug!(path = %installed.path.display(), "Evicting superseded build");
            self.fs
                .delete_directory(&installed.path)
                .await
                .map_err(|e| InstallError::local_io(&installed.path, e))?;
        }
        Ok(())
    }

    async fn discard_archive(&self, archive: &Path) {
        if let Err(e) = self.fs.delete_file(archive).await {
            warn!(path = %archive.display(), error = %e, "Failed to delete archive");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::download::DownloadError;
    use crate::testing::{
        build_record, locator_url, mod_record, MockCatalog, MockExtractor, MockTransport,
        RecordingFileSystem,
    };
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub temp: TempDir,
        pub catalog: Arc<MockCatalog>,
        pub transport: Arc<MockTransport>,
        pub fs: Arc<RecordingFileSystem>,
        pub extractor: Arc<MockExtractor>,
        pub orchestrator: InstallOrchestrator,
    }

    impl Fixture {
        pub fn install_dir(&self, name: &str) -> PathBuf {
            self.temp.path().join("install").join(name)
        }

        pub fn make_install_dir(&self, name: &str) {
            std::fs::create_dir_all(self.install_dir(name)).unwrap();
        }

        /// Put an archive on disk for `build` that reports `size`/`hash`.
        pub fn cache_archive(&self, build: &BuildRecord, size: u64, hash: &str) -> PathBuf {
            let path = self.orchestrator.store().archive_path(build);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"cached").unwrap();
            self.fs.fake_size_and_hash(&path, size, hash);
            path
        }
    }

    pub(crate) fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let catalog = Arc::new(MockCatalog::new());
        let transport = Arc::new(MockTransport::new());
        let fs = Arc::new(RecordingFileSystem::new());
        let extractor = Arc::new(MockExtractor::new());
        let clock = Arc::new(ServerClock::new());
        let downloads = Arc::new(DownloadCoordinator::new(
            catalog.clone(),
            transport.clone(),
            fs.clone(),
            Arc::clone(&clock),
        ));
        let store = LocalStore::new(temp.path().join("data"), fs.clone());
        let orchestrator = InstallOrchestrator::new(
            store,
            temp.path().join("install"),
            catalog.clone(),
            downloads,
            extractor.clone(),
            clock,
        );
        Fixture {
            temp,
            catalog,
            transport,
            fs,
            extractor,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_already_installed_is_untouched() {
        let f = fixture();
        f.make_install_dir("42_7");

        let outcome = f
            .orchestrator
            .ensure_installed(ModId(42), BuildId(7))
            .await
            .unwrap();

        assert_eq!(outcome, InstallOutcome::AlreadyInstalled);
        assert_eq!(f.fs.mutation_count(), 0, "{:?}", f.fs.mutations());
        assert_eq!(f.transport.call_count(), 0);
        assert!(f.extractor.extracted().is_empty());
        assert_eq!(f.catalog.metadata_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_matching_cached_archive_skips_download() {
        let f = fixture();
        let build = build_record(42, 7, 1000, Some("abc"));
        f.catalog.add_build(build.clone());
        let archive = f.cache_archive(&build, 1000, "abc");
        let mut events = f.orchestrator.subscribe_installs();

        let outcome = f
            .orchestrator
            .ensure_installed(ModId(42), BuildId(7))
            .await
            .unwrap();

        assert_eq!(outcome, InstallOutcome::Installed { downloaded: false });
        assert_eq!(f.transport.call_count(), 0);
        assert_eq!(f.extractor.extracted(), vec![archive.clone()]);
        assert!(f.install_dir("42_7").join("content.txt").exists());
        assert!(!archive.exists());
        assert_eq!(
            events.try_recv().unwrap(),
            InstallEvent::Installed {
                key: build.key()
            }
        );
    }

    #[tokio::test]
    async fn test_short_cached_archive_is_downloaded_again() {
        let f = fixture();
        let build = build_record(42, 7, 1000, Some("abc"));
        f.catalog.add_build(build.clone());
        let archive = f.cache_archive(&build, 900, "abc");
        // Verification of the fresh download
        f.fs.fake_size_and_hash(&archive, 1000, "abc");
        f.transport.set_payload(locator_url(42, 7), vec![0u8; 1000]);

        let outcome = f
            .orchestrator
            .ensure_installed(ModId(42), BuildId(7))
            .await
            .unwrap();

        assert_eq!(outcome, InstallOutcome::Installed { downloaded: true });
        assert_eq!(f.transport.call_count(), 1);
        assert_eq!(f.extractor.extracted(), vec![archive]);
        assert!(f.install_dir("42_7").exists());
    }

    #[tokio::test]
    async fn test_install_evicts_old_builds_but_not_drop_ins() {
        let f = fixture();
        for name in ["42_5", "42_6", "43_1", "My Pack", "42_x", "0_7"] {
            f.make_install_dir(name);
        }
        let build = build_record(42, 7, 64, None);
        f.catalog.add_build(build);
        f.transport.set_payload(locator_url(42, 7), vec![1u8; 64]);

        f.orchestrator
            .ensure_installed(ModId(42), BuildId(7))
            .await
            .unwrap();

        assert!(!f.install_dir("42_5").exists());
        assert!(!f.install_dir("42_6").exists());
        assert!(f.install_dir("42_7").exists());
        assert!(f.install_dir("43_1").exists());
        assert!(f.install_dir("My Pack").exists());
        assert!(f.install_dir("42_x").exists());
        assert!(f.install_dir("0_7").exists());
    }

    #[tokio::test]
    async fn test_integrity_failure_after_retries() {
        let f = fixture();
        let build = build_record(42, 7, 1000, None);
        f.catalog.add_build(build.clone());
        f.transport.set_payload(locator_url(42, 7), vec![0u8; 10]);

        let result = f.orchestrator.ensure_installed(ModId(42), BuildId(7)).await;

        match result {
            Err(InstallError::Integrity {
                expected_size,
                actual_size,
                ..
            }) => {
                assert_eq!(expected_size, 1000);
                assert_eq!(actual_size, 10);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(f.transport.call_count(), DEFAULT_MAX_DOWNLOAD_ATTEMPTS as usize);
        assert!(!f.orchestrator.store().archive_path(&build).exists());
        assert!(!f.install_dir("42_7").exists());
    }

    #[tokio::test]
    async fn test_extraction_failure_keeps_old_build() {
        let f = fixture();
        f.make_install_dir("42_5");
        let build = build_record(42, 7, 8, None);
        f.catalog.add_build(build.clone());
        f.transport.set_payload(locator_url(42, 7), vec![0u8; 8]);
        f.extractor
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let result = f.orchestrator.ensure_installed(ModId(42), BuildId(7)).await;

        assert!(matches!(result, Err(InstallError::Extraction { .. })));
        assert!(f.install_dir("42_5").exists());
        assert!(!f.install_dir("42_7").exists());
        let staging = staging_directory(f.orchestrator.store().root(), ModId(42), BuildId(7));
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_download_failure_is_reported() {
        let f = fixture();
        f.catalog.add_build(build_record(42, 7, 8, None));

        let result = f.orchestrator.ensure_installed(ModId(42), BuildId(7)).await;

        assert!(matches!(
            result,
            Err(InstallError::Download(DownloadError::Transfer(_)))
        ));
    }

    #[tokio::test]
    async fn test_build_resolved_from_cached_profile() {
        let f = fixture();
        let build = build_record(42, 7, 16, None);
        f.orchestrator
            .store()
            .save(
                &StoreEntry::ModProfile(ModId(42)),
                &mod_record(42, Some(build)),
            )
            .await
            .unwrap();
        f.transport.set_payload(locator_url(42, 7), vec![0u8; 16]);

        f.orchestrator
            .ensure_installed(ModId(42), BuildId(7))
            .await
            .unwrap();

        assert_eq!(f.catalog.metadata_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(f.install_dir("42_7").exists());
    }

    #[tokio::test]
    async fn test_unknown_build_fails_with_catalog_error() {
        let f = fixture();
        let result = f.orchestrator.ensure_installed(ModId(42), BuildId(7)).await;
        assert!(matches!(result, Err(InstallError::Catalog(_))));
    }

    #[tokio::test]
    async fn test_uninstall_removes_all_builds_and_cache() {
        let f = fixture();
        for name in ["42_5", "42_7", "43_1", "textures"] {
            f.make_install_dir(name);
        }
        f.orchestrator
            .store()
            .save(&StoreEntry::ModProfile(ModId(42)), &mod_record(42, None))
            .await
            .unwrap();
        let mut events = f.orchestrator.subscribe_installs();

        let report = f.orchestrator.uninstall(ModId(42)).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.removed.len(), 2);
        assert!(!f.install_dir("42_5").exists());
        assert!(!f.install_dir("42_7").exists());
        assert!(f.install_dir("43_1").exists());
        assert!(f.install_dir("textures").exists());
        assert!(f.orchestrator.store().cached_mod_ids().await.unwrap().is_empty());
        assert_eq!(
            events.try_recv().unwrap(),
            InstallEvent::Uninstalled {
                mod_id: ModId(42),
                complete: true
            }
        );
    }

    #[tokio::test]
    async fn test_uninstall_null_mod_touches_nothing() {
        let f = fixture();
        f.make_install_dir("textures");

        let report = f.orchestrator.uninstall(ModId::NULL).await.unwrap();

        assert!(report.removed.is_empty());
        assert!(f.install_dir("textures").exists());
        assert_eq!(f.fs.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_list_installed_and_queries() {
        let f = fixture();
        f.make_install_dir("1_2");
        f.make_install_dir("extra");

        let installed = f.orchestrator.list_installed().await.unwrap();

        assert_eq!(installed.len(), 2);
        assert!(f.orchestrator.active_download(ModId(1), BuildId(2)).is_none());
        assert!(!f.orchestrator.cancel(ModId(1), BuildId(2)));
    }
}
