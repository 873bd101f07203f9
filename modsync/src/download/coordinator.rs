//! The download coordinator.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::{partial_path, DownloadError, DownloadEvent, DownloadState, Transport};
use crate::catalog::{RemoteCatalog, ServerClock};
use crate::fs::FileSystem;
use crate::model::{BuildRecord, DownloadKey, DownloadLocator};

/// Interval between progress samples while transfers are active.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Owns all in-flight archive transfers.
///
/// Wrap in an `Arc`: starting a download spawns a task that keeps the
/// coordinator alive until the transfer finalizes.
///
/// # Example
///
/// ```ignore
/// let coordinator = Arc::new(DownloadCoordinator::new(catalog, transport, fs, clock));
/// let state = coordinator.start(DownloadKey::new(ModId(42), BuildId(7)), target);
/// state.wait().await?;
/// ```
pub struct DownloadCoordinator {
    catalog: Arc<dyn RemoteCatalog>,
    transport: Arc<dyn Transport>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<ServerClock>,
    active: DashMap<DownloadKey, Arc<DownloadState>>,
    events: broadcast::Sender<DownloadEvent>,
    sampler_running: AtomicBool,
    sample_interval: Duration,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("active", &self.active.len())
            .field("sample_interval", &self.sample_interval)
            .finish()
    }
}

impl DownloadCoordinator {
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        transport: Arc<dyn Transport>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<ServerClock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            catalog,
            transport,
            fs,
            clock,
            active: DashMap::new(),
            events,
            sampler_running: AtomicBool::new(false),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    /// Set the progress sampling interval.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Subscribe to download events.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// State of the active download for `key`, if any.
    pub fn active_download(&self, key: DownloadKey) -> Option<Arc<DownloadState>> {
        self.active.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    /// Keys of all active downloads.
    pub fn active_keys(&self) -> Vec<DownloadKey> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of downloads not yet finalized.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Returns true while the progress sampler task is running.
    pub fn is_sampling(&self) -> bool {
        self.sampler_running.load(Ordering::Acquire)
    }

    /// Start downloading `key` into `target`, fetching build metadata from
    /// the catalog.
    ///
    /// If a download for `key` is already active its state is returned
    /// unchanged and nothing new is started.
    pub fn start(self: &Arc<Self>, key: DownloadKey, target: PathBuf) -> Arc<DownloadState> {
        self.spawn_download(key, None, target)
    }

    /// Like [`start`](Self::start), reusing a known build record. The
    /// catalog is only consulted when the record's locator is missing or
    /// expired.
    pub fn start_with_build(
        self: &Arc<Self>,
        build: BuildRecord,
        target: PathBuf,
    ) -> Arc<DownloadState> {
        self.spawn_download(build.key(), Some(build), target)
    }

    /// Cancel the download for `key`. Returns false if none is active.
    ///
    /// A transfer already moving bytes is aborted and finalizes on its own
    /// task. One still resolving its locator is finalized here, before this
    /// call returns.
    pub fn cancel(&self, key: DownloadKey) -> bool {
        let Some(state) = self.active_download(key) else {
            debug!(key = %key, "No active download to cancel");
            return false;
        };

        state.mark_aborted();
        if state.is_started() {
            info!(key = %key, "Aborting transfer");
        } else {
            info!(key = %key, "Cancelling download before transfer");
            self.finish(&state, Err(DownloadError::Cancelled));
        }
        true
    }

    fn spawn_download(
        self: &Arc<Self>,
        key: DownloadKey,
        build: Option<BuildRecord>,
        target: PathBuf,
    ) -> Arc<DownloadState> {
        let state = match self.active.entry(key) {
            Entry::Occupied(existing) => {
                warn!(key = %key, "Download already active, returning existing state");
                return Arc::clone(existing.get());
            }
            Entry::Vacant(slot) => {
                let size = build.as_ref().map(|b| b.file_size).unwrap_or(0);
                let state = Arc::new(DownloadState::new(key, target, size));
                slot.insert(Arc::clone(&state));
                state
            }
        };

        debug!(key = %key, target = %state.target().display(), "Download queued");
        let coordinator = Arc::clone(self);
        let task_state = Arc::clone(&state);
        tokio::spawn(async move { coordinator.run(task_state, build).await });
        self.ensure_sampler();
        state
    }

    async fn run(self: Arc<Self>, state: Arc<DownloadState>, build: Option<BuildRecord>) {
        let cancel = state.cancel_token();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            result = self.transfer(&state, build) => result,
        };

        if result.is_err() && self.owns_slot(&state) {
            let part = partial_path(state.target());
            if let Err(e) = self.fs.delete_file(&part).await {
                debug!(path = %part.display(), error = %e, "Failed to remove partial file");
            }
        }
        self.finish(&state, result);
    }

    async fn transfer(
        &self,
        state: &Arc<DownloadState>,
        build: Option<BuildRecord>,
    ) -> Result<(), DownloadError> {
        let key = state.key();
        let (build, locator) = self.resolve(key, build).await?;
        state.set_file_size(build.file_size);

        let part = partial_path(state.target());
        self.fs
            .write_file(&part, &[])
            .await
            .map_err(|e| DownloadError::local_io(&part, e))?;

        state.mark_started();
        info!(key = %key, size = build.file_size, "Download started");
        let _ = self.events.send(DownloadEvent::Started {
            key,
            state: Arc::clone(state),
        });

        let bytes = self
            .transport
            .fetch(
                &locator.url,
                &part,
                state.progress_counter(),
                state.cancel_token(),
            )
            .await?;

        self.fs
            .move_file(&part, state.target())
            .await
            .map_err(|e| DownloadError::local_io(state.target(), e))?;

        debug!(key = %key, bytes, "Transfer complete");
        Ok(())
    }

    /// Find a usable locator, refreshing the build from the catalog when the
    /// known one is missing or expired.
    async fn resolve(
        &self,
        key: DownloadKey,
        known: Option<BuildRecord>,
    ) -> Result<(BuildRecord, DownloadLocator), DownloadError> {
        let build = match known {
            Some(build) if build.has_valid_locator(self.clock.now()) => build,
            _ => {
                debug!(key = %key, "Fetching build metadata for download locator");
                self.catalog
                    .get_build_metadata(key.mod_id, key.build_id)
                    .await?
            }
        };

        let locator = match &build.locator {
            None => return Err(DownloadError::MissingLocator(key)),
            Some(locator) if locator.is_expired(self.clock.now()) => {
                return Err(DownloadError::LocatorExpired(key))
            }
            Some(locator) => locator.clone(),
        };
        Ok((build, locator))
    }

    /// Finalize `state`, remove it from the active set and publish the
    /// terminal event. Later calls for the same state are no-ops.
    fn finish(&self, state: &Arc<DownloadState>, result: Result<(), DownloadError>) {
        let key = state.key();
        if !state.finalize(&result) {
            trace!(key = %key, "Ignoring completion of finalized download");
            return;
        }

        // Retire the slot before anyone is told, so a listener that starts
        // again gets a fresh state
        self.active
            .remove_if(&key, |_, active| Arc::ptr_eq(active, state));
        state.notify_finished();

        let event = match result {
            Ok(()) => {
                info!(key = %key, bytes = state.bytes_downloaded(), "Download succeeded");
                DownloadEvent::Succeeded {
                    key,
                    state: Arc::clone(state),
                }
            }
            Err(error) => {
                warn!(key = %key, error = %error, "Download failed");
                DownloadEvent::Failed { key, error }
            }
        };
        let _ = self.events.send(event);
    }

    fn owns_slot(&self, state: &Arc<DownloadState>) -> bool {
        self.active
            .get(&state.key())
            .map_or(true, |active| Arc::ptr_eq(active.value(), state))
    }

    fn ensure_sampler(self: &Arc<Self>) {
        if self
            .sampler_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.sample_loop().await });
    }

    /// Sample progress of started transfers until none are active.
    async fn sample_loop(self: Arc<Self>) {
        trace!("Progress sampler started");
        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.active.is_empty() {
                self.sampler_running.store(false, Ordering::Release);
                // A start may have slipped in between the check and the store
                if self.active.is_empty()
                    || self
                        .sampler_running
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    break;
                }
                continue;
            }

            let now = Instant::now();
            for entry in self.active.iter() {
                if entry.value().is_started() {
                    entry.value().sample(now);
                }
            }
        }
        trace!("Progress sampler stopped");
    }
}
