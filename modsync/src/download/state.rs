//! Live state of one transfer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::throughput::ThroughputTracker;
use super::DownloadError;
use crate::model::DownloadKey;

/// Shared, observable state of an active download.
///
/// Owned by the [`DownloadCoordinator`](super::DownloadCoordinator); callers
/// hold `Arc`s to watch progress. A state becomes terminal exactly once.
#[derive(Debug)]
pub struct DownloadState {
    key: DownloadKey,
    target: PathBuf,
    file_size: AtomicU64,
    bytes_downloaded: Arc<AtomicU64>,
    throughput: Mutex<ThroughputTracker>,
    bytes_per_second: AtomicU64,
    started: AtomicBool,
    done: AtomicBool,
    aborted: AtomicBool,
    error: Mutex<Option<DownloadError>>,
    cancel: CancellationToken,
    finished: watch::Sender<bool>,
}

impl DownloadState {
    pub(crate) fn new(key: DownloadKey, target: PathBuf, file_size: u64) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            key,
            target,
            file_size: AtomicU64::new(file_size),
            bytes_downloaded: Arc::new(AtomicU64::new(0)),
            throughput: Mutex::new(ThroughputTracker::new()),
            bytes_per_second: AtomicU64::new(0f64.to_bits()),
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            error: Mutex::new(None),
            cancel: CancellationToken::new(),
            finished,
        }
    }

    pub fn key(&self) -> DownloadKey {
        self.key
    }

    /// Final path of the archive once the transfer succeeds.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Expected size in bytes (0 until the build metadata is known).
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Relaxed)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    /// Smoothed transfer rate from the last progress samples.
    pub fn bytes_per_second(&self) -> f64 {
        f64::from_bits(self.bytes_per_second.load(Ordering::Relaxed))
    }

    /// Fraction complete in `0.0..=1.0`, 0 when the size is unknown.
    pub fn progress(&self) -> f64 {
        let size = self.file_size();
        if size == 0 {
            return 0.0;
        }
        (self.bytes_downloaded() as f64 / size as f64).min(1.0)
    }

    /// Returns true once bytes are being transferred.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Terminal error, if the download failed.
    pub fn error(&self) -> Option<DownloadError> {
        self.error.lock().clone()
    }

    /// Wait until the download is terminal and return its outcome.
    pub async fn wait(&self) -> Result<(), DownloadError> {
        let mut rx = self.finished.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|finished| *finished).await;
        match self.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn set_file_size(&self, size: u64) {
        self.file_size.store(size, Ordering::Relaxed);
    }

    pub(crate) fn progress_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_downloaded)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Record a progress marker and refresh the smoothed rate.
    pub(crate) fn sample(&self, at: Instant) {
        let mut tracker = self.throughput.lock();
        tracker.record(at, self.bytes_downloaded());
        self.bytes_per_second
            .store(tracker.bytes_per_second().to_bits(), Ordering::Relaxed);
    }

    /// Make the state terminal. Returns false if it already was.
    ///
    /// Waiters are released separately by [`notify_finished`](Self::notify_finished)
    /// so the owner can retire the state first.
    pub(crate) fn finalize(&self, result: &Result<(), DownloadError>) -> bool {
        if self
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if let Err(e) = result {
            if matches!(e, DownloadError::Cancelled) {
                self.aborted.store(true, Ordering::Release);
            }
            *self.error.lock() = Some(e.clone());
        }
        true
    }

    /// Release everyone blocked in [`wait`](Self::wait).
    pub(crate) fn notify_finished(&self) {
        self.finished.send_replace(true);
    }
}
