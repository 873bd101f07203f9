//! Archive extraction and compression.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Archive operation failure.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Reading or writing files failed.
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The archive is malformed or contains unsafe entries.
    #[error("invalid archive: {0}")]
    Invalid(String),

    /// The blocking worker panicked or was cancelled.
    #[error("archive task failed: {0}")]
    Task(String),
}

impl ExtractError {
    pub fn io(path: &Path, error: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: error.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(error: zip::result::ZipError) -> Self {
        match error {
            zip::result::ZipError::Io(e) => Self::Io {
                path: PathBuf::new(),
                message: e.to_string(),
            },
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Unpacks and packs build archives.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract every entry of `archive` into `dest`, creating it.
    fn extract_all<'a>(
        &'a self,
        archive: &'a Path,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExtractError>>;

    /// Pack `files` (relative to `src`; empty means everything under `src`)
    /// into `dest_archive`.
    fn compress_directory<'a>(
        &'a self,
        src: &'a Path,
        files: &'a [PathBuf],
        dest_archive: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExtractError>>;
}

/// [`ArchiveExtractor`] for zip archives, run on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiver;

impl ZipArchiver {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for ZipArchiver {
    fn extract_all<'a>(
        &'a self,
        archive: &'a Path,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExtractError>> {
        let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
        async move {
            tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
                .await
                .map_err(|e| ExtractError::Task(e.to_string()))?
        }
        .boxed()
    }

    fn compress_directory<'a>(
        &'a self,
        src: &'a Path,
        files: &'a [PathBuf],
        dest_archive: &'a Path,
    ) -> BoxFuture<'a, Result<(), ExtractError>> {
        let (src, files, dest) = (src.to_path_buf(), files.to_vec(), dest_archive.to_path_buf());
        async move {
            tokio::task::spawn_blocking(move || compress_zip(&src, &files, &dest))
                .await
                .map_err(|e| ExtractError::Task(e.to_string()))?
        }
        .boxed()
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive).map_err(|e| ExtractError::io(archive, e))?;
    let mut zip = ZipArchive::new(file)?;
    std::fs::create_dir_all(dest).map_err(|e| ExtractError::io(dest, e))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ExtractError::Invalid(format!(
                "entry '{}' escapes the destination",
                entry.name()
            )));
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| ExtractError::io(&out, e))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }
        let mut target = File::create(&out).map_err(|e| ExtractError::io(&out, e))?;
        io::copy(&mut entry, &mut target).map_err(|e| ExtractError::io(&out, e))?;
    }

    debug!(archive = %archive.display(), entries = zip.len(), "Archive extracted");
    Ok(())
}

fn compress_zip(src: &Path, files: &[PathBuf], dest: &Path) -> Result<(), ExtractError> {
    let files = if files.is_empty() {
        let mut all = Vec::new();
        collect_files(src, src, &mut all).map_err(|e| ExtractError::io(src, e))?;
        all.sort();
        all
    } else {
        files.to_vec()
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
    }
    let out = File::create(dest).map_err(|e| ExtractError::io(dest, e))?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for relative in &files {
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let path = src.join(relative);
        let mut input = File::open(&path).map_err(|e| ExtractError::io(&path, e))?;
        writer.start_file(name, options)?;
        io::copy(&mut input, &mut writer).map_err(|e| ExtractError::io(&path, e))?;
    }

    writer.finish()?;
    debug!(archive = %dest.display(), files = files.len(), "Archive written");
    Ok(())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}
