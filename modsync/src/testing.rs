//! In-crate test doubles for the engine's collaborators.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::catalog::{
    BuildFilter, CatalogError, CatalogResult, ModFilter, Page, Pagination, RemoteCatalog,
};
use crate::download::{Transport, TransportError};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::install::{ArchiveExtractor, ExtractError};
use crate::model::{BuildId, BuildRecord, DownloadKey, DownloadLocator, ModId, ModRecord};

/// Far-future expiry for locators that should never need a refresh.
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Build record with a locator pointing at `mock://<mod>/<build>`.
pub fn build_record(mod_id: u64, build_id: u64, file_size: u64, hash: Option<&str>) -> BuildRecord {
    BuildRecord {
        mod_id: ModId(mod_id),
        build_id: BuildId(build_id),
        file_name: format!("{}.zip", build_id),
        version: Some(format!("1.{}", build_id)),
        file_size,
        file_hash: hash.map(str::to_string),
        locator: Some(DownloadLocator {
            url: locator_url(mod_id, build_id),
            expires_at: NEVER_EXPIRES,
        }),
    }
}

pub fn locator_url(mod_id: u64, build_id: u64) -> String {
    format!("mock://{}/{}", mod_id, build_id)
}

pub fn mod_record(mod_id: u64, current: Option<BuildRecord>) -> ModRecord {
    ModRecord {
        mod_id: ModId(mod_id),
        name: format!("Mod {}", mod_id),
        summary: String::new(),
        date_updated: 0,
        current_build: current,
        stats: None,
    }
}

/// Catalog serving fixed records.
#[derive(Default)]
pub struct MockCatalog {
    builds: Mutex<HashMap<DownloadKey, BuildRecord>>,
    mods: Mutex<Vec<ModRecord>>,
    metadata_error: Mutex<Option<CatalogError>>,
    metadata_gate: Mutex<Option<Arc<Notify>>>,
    pub metadata_calls: AtomicUsize,
    pub mod_page_calls: AtomicUsize,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_build(&self, build: BuildRecord) {
        self.builds.lock().insert(build.key(), build);
    }

    pub fn add_mod(&self, record: ModRecord) {
        if let Some(build) = &record.current_build {
            self.add_build(build.clone());
        }
        self.mods.lock().push(record);
    }

    /// Make every metadata request fail with `error`.
    pub fn fail_metadata(&self, error: CatalogError) {
        *self.metadata_error.lock() = Some(error);
    }

    /// Hold metadata requests until the returned notify fires.
    pub fn gate_metadata(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.metadata_gate.lock() = Some(Arc::clone(&gate));
        gate
    }
}

impl RemoteCatalog for MockCatalog {
    fn get_build_metadata(
        &self,
        mod_id: ModId,
        build_id: BuildId,
    ) -> BoxFuture<'_, CatalogResult<BuildRecord>> {
        async move {
            self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.metadata_gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if let Some(error) = self.metadata_error.lock().clone() {
                return Err(error);
            }
            self.builds
                .lock()
                .get(&DownloadKey::new(mod_id, build_id))
                .cloned()
                .ok_or(CatalogError::Unresolvable {
                    status: 404,
                    message: "build not found".to_string(),
                })
        }
        .boxed()
    }

    fn get_mods<'a>(
        &'a self,
        filter: &'a ModFilter,
        page: Pagination,
    ) -> BoxFuture<'a, CatalogResult<Page<ModRecord>>> {
        async move {
            self.mod_page_calls.fetch_add(1, Ordering::SeqCst);
            let matching: Vec<ModRecord> = self
                .mods
                .lock()
                .iter()
                .filter(|m| filter.ids.is_empty() || filter.ids.contains(&m.mod_id))
                .cloned()
                .collect();
            let items = matching
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect();
            Ok(Page::new(items, page))
        }
        .boxed()
    }

    fn get_builds<'a>(
        &'a self,
        mod_id: ModId,
        _filter: &'a BuildFilter,
        page: Pagination,
    ) -> BoxFuture<'a, CatalogResult<Page<BuildRecord>>> {
        async move {
            let mut builds: Vec<BuildRecord> = self
                .builds
                .lock()
                .values()
                .filter(|b| b.mod_id == mod_id)
                .cloned()
                .collect();
            builds.sort_by_key(|b| b.build_id);
            let items = builds
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect();
            Ok(Page::new(items, page))
        }
        .boxed()
    }
}

/// Transport writing canned payloads keyed by URL.
#[derive(Default)]
pub struct MockTransport {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_payload(&self, url: impl Into<String>, data: Vec<u8>) {
        self.payloads.lock().insert(url.into(), data);
    }

    /// Hold transfers until the returned notify fires.
    pub fn gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<u64, TransportError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    _ = gate.notified() => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let payload = self.payloads.lock().get(url).cloned();
            let Some(data) = payload else {
                return Err(TransportError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            };
            tokio::fs::write(dest, &data)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            progress.fetch_add(data.len() as u64, Ordering::Relaxed);
            Ok(data.len() as u64)
        }
        .boxed()
    }
}

/// [`LocalFileSystem`] that counts mutations and can fake hashes or fail
/// file moves.
#[derive(Default)]
pub struct RecordingFileSystem {
    inner: LocalFileSystem,
    mutations: Mutex<Vec<String>>,
    hashes: Mutex<HashMap<PathBuf, VecDeque<(u64, String)>>>,
    pub fail_file_moves: AtomicBool,
}

impl RecordingFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().len()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().clone()
    }

    /// Report `size`/`hash` for the next `size_and_hash` of `path` instead
    /// of hashing it. Queued fakes are consumed in order.
    pub fn fake_size_and_hash(&self, path: impl Into<PathBuf>, size: u64, hash: &str) {
        self.hashes
            .lock()
            .entry(path.into())
            .or_default()
            .push_back((size, hash.to_string()));
    }

    fn record(&self, op: &str, path: &Path) {
        self.mutations
            .lock()
            .push(format!("{} {}", op, path.display()));
    }
}

impl FileSystem for RecordingFileSystem {
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        self.inner.read_file(path)
    }

    fn write_file<'a>(&'a self, path: &'a Path, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        self.record("write", path);
        self.inner.write_file(path, data)
    }

    fn move_file<'a>(&'a self, from: &'a Path, to: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        self.record("move", from);
        if self.fail_file_moves.load(Ordering::SeqCst) {
            return futures::future::ready(Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "move denied",
            )))
            .boxed();
        }
        self.inner.move_file(from, to)
    }

    fn delete_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        self.record("delete", path);
        self.inner.delete_file(path)
    }

    fn create_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        self.record("mkdir", path);
        self.inner.create_directory(path)
    }

    fn delete_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        self.record("rmdir", path);
        self.inner.delete_directory(path)
    }

    fn move_directory<'a>(
        &'a self,
        from: &'a Path,
        to: &'a Path,
    ) -> BoxFuture<'a, io::Result<()>> {
        self.record("movedir", from);
        self.inner.move_directory(from, to)
    }

    fn list_directories<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<PathBuf>>> {
        self.inner.list_directories(path)
    }

    fn file_exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        self.inner.file_exists(path)
    }

    fn directory_exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        self.inner.directory_exists(path)
    }

    fn size_and_hash<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<(u64, String)>> {
        let fake = self
            .hashes
            .lock()
            .get_mut(path)
            .and_then(|queue| queue.pop_front());
        match fake {
            Some(value) => futures::future::ready(Ok(value)).boxed(),
            None => self.inner.size_and_hash(path),
        }
    }
}

/// Extractor that writes a marker file instead of unpacking.
#[derive(Default)]
pub struct MockExtractor {
    extracted: Mutex<Vec<PathBuf>>,
    pub fail: AtomicBool,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archives passed to `extract_all`, in call order.
    pub fn extracted(&self) -> Vec<PathBuf> {
        self.extracted.lock().clone()
    }
}

impl ArchiveExtractor for MockExtractor {
    fn extract_all<'a>(
        &'a self,
        archive: &'a Path,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExtractError>> {
        async move {
            self.extracted.lock().push(archive.to_path_buf());
            tokio::fs::create_dir_all(dest)
                .await
                .map_err(|e| ExtractError::io(dest, e))?;
            if self.fail.load(Ordering::SeqCst) {
                tokio::fs::write(dest.join("partial.bin"), b"x")
                    .await
                    .map_err(|e| ExtractError::io(dest, e))?;
                return Err(ExtractError::Invalid("corrupt archive".to_string()));
            }
            tokio::fs::write(dest.join("content.txt"), archive.display().to_string())
                .await
                .map_err(|e| ExtractError::io(dest, e))
        }
        .boxed()
    }

    fn compress_directory<'a>(
        &'a self,
        _src: &'a Path,
        _files: &'a [PathBuf],
        _dest_archive: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExtractError>> {
        futures::future::ready(Ok(())).boxed()
    }
}
