//! Batch reconciliation of desired builds against disk and cache.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::orchestrator::{InstallOrchestrator, InstallOutcome};
use super::InstallResult;
use crate::catalog::{fetch_all_mods, ModFilter};
use crate::model::{BuildRecord, DownloadKey, ModId, ModRecord};
use crate::store::{ArchiveCheck, StoreEntry};

/// Outcome of a reconcile pass, one bucket per build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Builds whose install directory already existed.
    pub already_installed: Vec<DownloadKey>,
    /// Builds installed from a valid cached archive.
    pub installed_from_cache: Vec<DownloadKey>,
    /// Builds downloaded and installed.
    pub downloaded: Vec<DownloadKey>,
    /// Builds whose download locator could not be refreshed.
    pub unresolvable: Vec<DownloadKey>,
    /// Builds whose install failed, with the reason.
    pub failed: Vec<(DownloadKey, String)>,
    /// Requested mods the catalog did not return.
    pub missing_mods: Vec<ModId>,
}

impl ReconcileReport {
    /// Returns true if every requested build ended up installed.
    pub fn is_complete(&self) -> bool {
        self.unresolvable.is_empty() && self.failed.is_empty() && self.missing_mods.is_empty()
    }

    /// Number of builds installed by this pass.
    pub fn installed_count(&self) -> usize {
        self.installed_from_cache.len() + self.downloaded.len()
    }
}

impl InstallOrchestrator {
    /// Install every build in `builds` that is not installed yet.
    ///
    /// Builds are partitioned into already-installed, installable from the
    /// cached archive, and needing a download. Expired download locators are
    /// refreshed from the catalog first; builds that cannot be refreshed are
    /// reported as unresolvable. The rest are installed one at a time. A
    /// failing build is recorded and the batch continues.
    pub async fn assert_installed_and_current(&self, builds: Vec<BuildRecord>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();
        let mut from_cache = Vec::new();
        let mut needs_download = Vec::new();

        for build in builds {
            let key = build.key();
            if !seen.insert(key) {
                continue;
            }
            if self.is_installed(build.mod_id, build.build_id).await {
                report.already_installed.push(key);
            } else if self.store.check_archive(&build).await == ArchiveCheck::Valid {
                from_cache.push(build);
            } else {
                needs_download.push(build);
            }
        }

        let mut pending = from_cache;
        for build in needs_download {
            let key = build.key();
            match self.refresh_locator(build).await {
                Some(build) => pending.push(build),
                None => report.unresolvable.push(key),
            }
        }

        debug!(
            already_installed = report.already_installed.len(),
            pending = pending.len(),
            unresolvable = report.unresolvable.len(),
            "Reconcile plan"
        );

        for build in pending {
            let key = build.key();
            match self.ensure_build_installed(&build).await {
                Ok(InstallOutcome::AlreadyInstalled) => report.already_installed.push(key),
                Ok(InstallOutcome::Installed { downloaded: false }) => {
                    report.installed_from_cache.push(key)
                }
                Ok(InstallOutcome::Installed { downloaded: true }) => report.downloaded.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Install failed, continuing with batch");
                    report.failed.push((key, e.to_string()));
                }
            }
        }

        info!(
            installed = report.installed_count(),
            already_installed = report.already_installed.len(),
            unresolvable = report.unresolvable.len(),
            failed = report.failed.len(),
            "Reconcile complete"
        );
        report
    }

    /// Fetch the current profiles of `mod_ids`, cache them, and reconcile
    /// their current builds. An empty list syncs every mod in the store.
    ///
    /// A mod whose profile cannot be cached is reported as failed and
    /// skipped; the rest of the batch continues.
    pub async fn sync_mods(&self, mod_ids: &[ModId]) -> InstallResult<ReconcileReport> {
        let ids = if mod_ids.is_empty() {
            self.store.cached_mod_ids().await?
        } else {
            mod_ids.to_vec()
        };
        if ids.is_empty() {
            debug!("Nothing to sync");
            return Ok(ReconcileReport::default());
        }

        let filter = ModFilter::with_ids(ids.iter().copied());
        let mods = fetch_all_mods(
            self.catalog.as_ref(),
            &filter,
            &self.fetch_policy,
            &self.clock,
        )
        .await?;

        let returned: HashSet<ModId> = mods.iter().map(|m| m.mod_id).collect();
        let missing_mods: Vec<ModId> = ids
            .iter()
            .copied()
            .filter(|id| !returned.contains(id))
            .collect();
        for id in &missing_mods {
            warn!(mod_id = %id, "Mod not returned by catalog");
        }

        let mut builds = Vec::new();
        let mut cache_failures = Vec::new();
        for record in mods {
            if let Err(e) = self.cache_profile(&record).await {
                warn!(mod_id = %record.mod_id, error = %e, "Failed to cache mod profile, skipping mod");
                if let Some(build) = &record.current_build {
                    cache_failures.push((build.key(), e.to_string()));
                }
                continue;
            }
            match record.current_build {
                Some(build) => builds.push(build),
                None => debug!(mod_id = %record.mod_id, "Mod has no live build"),
            }
        }

        let mut report = self.assert_installed_and_current(builds).await;
        cache_failures.append(&mut report.failed);
        report.failed = cache_failures;
        report.missing_mods = missing_mods;
        Ok(report)
    }

    async fn cache_profile(&self, record: &ModRecord) -> InstallResult<()> {
        self.store
            .save(&StoreEntry::ModProfile(record.mod_id), record)
            .await?;
        if let Some(stats) = &record.stats {
            self.store
                .save(&StoreEntry::ModStatistics(record.mod_id), stats)
                .await?;
        }
        if let Some(build) = &record.current_build {
            self.store
                .save(&StoreEntry::BuildMetadata(build.mod_id, build.build_id), build)
                .await?;
        }
        Ok(())
    }

    /// Make sure `build` carries a usable locator, asking the catalog when
    /// it does not. Returns `None` if no usable locator can be obtained.
    async fn refresh_locator(&self, build: BuildRecord) -> Option<BuildRecord> {
        if build.has_valid_locator(self.clock.now()) {
            return Some(build);
        }

        let key = build.key();
        debug!(key = %key, "Refreshing expired download locator");
        match self
            .catalog
            .get_build_metadata(build.mod_id, build.build_id)
            .await
        {
            Ok(fresh) if fresh.has_valid_locator(self.clock.now()) => Some(fresh),
            Ok(_) => {
                warn!(key = %key, "Catalog returned no usable download locator");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to refresh download locator");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::install::orchestrator::tests::fixture;
    use crate::model::{BuildId, DownloadLocator, ModStatistics};
    use crate::testing::{build_record, locator_url, mod_record};

    fn expired(mut build: BuildRecord) -> BuildRecord {
        build.locator = Some(DownloadLocator {
            url: "mock://expired".to_string(),
            expires_at: 0,
        });
        build
    }

    #[tokio::test]
    async fn test_partitions_builds() {
        let f = fixture();
        // 1: installed, 2: cached archive, 3: download, 4: expired and unrefreshable
        f.make_install_dir("1_10");
        let cached = build_record(2, 20, 100, Some("abc"));
        let archive = f.cache_archive(&cached, 100, "abc");
        // Checked once while partitioning and again before installing
        f.fs.fake_size_and_hash(&archive, 100, "abc");
        let download = build_record(3, 30, 8, None);
        f.transport.set_payload(locator_url(3, 30), vec![0u8; 8]);
        let stale = expired(build_record(4, 40, 8, None));
        f.catalog.fail_metadata(CatalogError::Unreachable("offline".into()));

        let report = f
            .orchestrator
            .assert_installed_and_current(vec![
                build_record(1, 10, 5, None),
                cached.clone(),
                download.clone(),
                stale.clone(),
            ])
            .await;

        assert_eq!(report.already_installed, vec![DownloadKey::new(ModId(1), BuildId(10))]);
        assert_eq!(report.installed_from_cache, vec![cached.key()]);
        assert_eq!(report.downloaded, vec![download.key()]);
        assert_eq!(report.unresolvable, vec![stale.key()]);
        assert!(report.failed.is_empty());
        assert!(!report.is_complete());
        assert_eq!(f.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_locator_is_refreshed_before_download() {
        let f = fixture();
        let fresh = build_record(5, 50, 4, None);
        f.catalog.add_build(fresh.clone());
        f.transport.set_payload(locator_url(5, 50), vec![0u8; 4]);

        let report = f
            .orchestrator
            .assert_installed_and_current(vec![expired(fresh.clone())])
            .await;

        assert_eq!(report.downloaded, vec![fresh.key()]);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let f = fixture();
        let broken = build_record(1, 1, 4, None);
        let good = build_record(2, 2, 4, None);
        f.transport.set_payload(locator_url(2, 2), vec![0u8; 4]);

        let report = f
            .orchestrator
            .assert_installed_and_current(vec![broken.clone(), good.clone()])
            .await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken.key());
        assert_eq!(report.downloaded, vec![good.key()]);
        assert!(f.install_dir("2_2").exists());
    }

    #[tokio::test]
    async fn test_duplicate_builds_are_installed_once() {
        let f = fixture();
        let build = build_record(1, 1, 4, None);
        f.transport.set_payload(locator_url(1, 1), vec![0u8; 4]);

        let report = f
            .orchestrator
            .assert_installed_and_current(vec![build.clone(), build.clone()])
            .await;

        assert_eq!(report.downloaded, vec![build.key()]);
        assert_eq!(f.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_mods_caches_profiles_and_installs() {
        let f = fixture();
        let mut first = mod_record(1, Some(build_record(1, 11, 4, None)));
        first.stats = Some(ModStatistics {
            mod_id: ModId(1),
            downloads_total: 12,
            ..Default::default()
        });
        f.catalog.add_mod(first);
        f.catalog.add_mod(mod_record(2, Some(build_record(2, 21, 4, None))));
        f.catalog.add_mod(mod_record(9, None));
        f.transport.set_payload(locator_url(1, 11), vec![0u8; 4]);
        f.transport.set_payload(locator_url(2, 21), vec![0u8; 4]);

        let report = f
            .orchestrator
            .sync_mods(&[ModId(1), ModId(2), ModId(3)])
            .await
            .unwrap();

        assert_eq!(report.downloaded.len(), 2);
        assert_eq!(report.missing_mods, vec![ModId(3)]);
        assert!(f.install_dir("1_11").exists());
        assert!(f.install_dir("2_21").exists());

        let store = f.orchestrator.store();
        assert_eq!(store.cached_mod_ids().await.unwrap(), vec![ModId(1), ModId(2)]);
        let stats: ModStatistics = store
            .load(&StoreEntry::ModStatistics(ModId(1)))
            .await
            .unwrap();
        assert_eq!(stats.downloads_total, 12);
    }

    #[tokio::test]
    async fn test_sync_continues_when_profile_cannot_be_saved() {
        let f = fixture();
        f.catalog.add_mod(mod_record(1, Some(build_record(1, 11, 4, None))));
        f.catalog.add_mod(mod_record(2, Some(build_record(2, 21, 4, None))));
        f.transport.set_payload(locator_url(1, 11), vec![0u8; 4]);
        f.transport.set_payload(locator_url(2, 21), vec![0u8; 4]);
        // A directory where the profile file belongs makes the save fail
        let blocked = f.orchestrator.store().path_for(&StoreEntry::ModProfile(ModId(1)));
        std::fs::create_dir_all(&blocked).unwrap();

        let report = f
            .orchestrator
            .sync_mods(&[ModId(1), ModId(2)])
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, DownloadKey::new(ModId(1), BuildId(11)));
        assert_eq!(report.downloaded, vec![DownloadKey::new(ModId(2), BuildId(21))]);
        assert!(!f.install_dir("1_11").exists());
        assert!(f.install_dir("2_21").exists());
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_sync_without_ids_uses_cached_mods() {
        let f = fixture();
        f.catalog.add_mod(mod_record(7, Some(build_record(7, 70, 4, None))));
        f.catalog.add_mod(mod_record(8, Some(build_record(8, 80, 4, None))));
        f.transport.set_payload(locator_url(7, 70), vec![0u8; 4]);
        f.orchestrator
            .store()
            .save(&StoreEntry::ModProfile(ModId(7)), &mod_record(7, None))
            .await
            .unwrap();

        let report = f.orchestrator.sync_mods(&[]).await.unwrap();

        assert_eq!(
            report.downloaded,
            vec![DownloadKey::new(ModId(7), BuildId(70))]
        );
        assert!(!f.install_dir("8_80").exists());
    }

    #[tokio::test]
    async fn test_sync_nothing_cached() {
        let f = fixture();
        let report = f.orchestrator.sync_mods(&[]).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(
            f.catalog
                .mod_page_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }
}
