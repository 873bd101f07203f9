//! Filesystem abstraction used by the store, coordinator and installer.
//!
//! Every engine-side file operation goes through [`FileSystem`] so that tests
//! can observe or fake disk mutations. [`LocalFileSystem`] is the production
//! implementation on top of `tokio::fs`.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Asynchronous filesystem primitives.
///
/// All operations report failure through `io::Result` and never panic.
/// Deleting something that does not exist succeeds.
pub trait FileSystem: Send + Sync {
    /// Read a whole file.
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>>;

    /// Write a whole file, creating parent directories as needed.
    fn write_file<'a>(&'a self, path: &'a Path, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Move a file, replacing the destination if present.
    fn move_file<'a>(&'a self, from: &'a Path, to: &'a Path) -> BoxFuture<'a, io::Result<()>>;

    /// Delete a file.
    fn delete_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>>;

    /// Create a directory and all missing parents.
    fn create_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>>;

    /// Delete a directory recursively.
    fn delete_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>>;

    /// Move a directory to a destination that must not exist yet.
    fn move_directory<'a>(&'a self, from: &'a Path, to: &'a Path)
        -> BoxFuture<'a, io::Result<()>>;

    /// List the immediate subdirectories of `path`. A missing `path` yields
    /// an empty list.
    fn list_directories<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<PathBuf>>>;

    /// Returns true if `path` is an existing regular file.
    fn file_exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool>;

    /// Returns true if `path` is an existing directory.
    fn directory_exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool>;

    /// Size in bytes and lowercase hex SHA-256 of a file.
    fn size_and_hash<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<(u64, String)>>;
}

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl FileSystem for LocalFileSystem {
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        Box::pin(tokio::fs::read(path))
    }

    fn write_file<'a>(&'a self, path: &'a Path, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, data).await
        })
    }

    fn move_file<'a>(&'a self, from: &'a Path, to: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(from, to).await
        })
    }

    fn delete_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move { ignore_not_found(tokio::fs::remove_file(path).await) })
    }

    fn create_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(tokio::fs::create_dir_all(path))
    }

    fn delete_directory<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move { ignore_not_found(tokio::fs::remove_dir_all(path).await) })
    }

    fn move_directory<'a>(
        &'a self,
        from: &'a Path,
        to: &'a Path,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            if tokio::fs::try_exists(to).await? {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("destination {} already exists", to.display()),
                ));
            }
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::rename(from, to).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
                Err(e) => {
                    // Typically a cross-device rename; fall back to copy + delete
                    debug!(
                        from = %from.display(),
                        to = %to.display(),
                        error = %e,
                        "Rename failed, copying directory instead"
                    );
                    let (src, dst) = (from.to_path_buf(), to.to_path_buf());
                    tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst))
                        .await
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
                    tokio::fs::remove_dir_all(from).await
                }
            }
        })
    }

    fn list_directories<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<PathBuf>>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(path).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };

            let mut dirs = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    dirs.push(entry.path());
                }
            }
            dirs.sort();
            Ok(dirs)
        })
    }

    fn file_exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
        })
    }

    fn directory_exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            tokio::fs::metadata(path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
        })
    }

    fn size_and_hash<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<(u64, String)>> {
        Box::pin(async move {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || sha256_file(&path))
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
        })
    }
}

/// Compute the size and SHA-256 of a file.
///
/// Returns the checksum as a lowercase hex string.
pub fn sha256_file(path: &Path) -> io::Result<(u64, String)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        total += bytes_read as u64;
        hasher.update(&buffer[..bytes_read]);
    }

    Ok((total, format!("{:x}", hasher.finalize())))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
