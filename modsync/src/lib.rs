//! modsync - keep a game's installed mods in step with a remote catalog
//!
//! The library mirrors mod and build metadata from a paginated HTTP catalog
//! into a local store, downloads build archives with progress tracking,
//! verifies them by size and SHA-256, and installs them into the game's mod
//! directory.
//!
//! # High-Level API
//!
//! [`config::EngineConfig`] wires the production stack and returns an
//! [`install::InstallOrchestrator`]:
//!
//! ```ignore
//! use modsync::config::{ConfigFile, EngineConfig};
//! use modsync::model::{BuildId, ModId};
//!
//! let engine = EngineConfig::from_file(&ConfigFile::load()?)?.build()?;
//!
//! // Install one build, downloading it if needed
//! engine.ensure_installed(ModId(42), BuildId(7)).await?;
//!
//! // Bring every locally known mod up to its current build
//! let report = engine.sync_mods(&[]).await?;
//! ```

pub mod catalog;
pub mod config;
pub mod download;
pub mod fs;
pub mod install;
pub mod logging;
pub mod model;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

/// Version of the modsync library and CLI.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
