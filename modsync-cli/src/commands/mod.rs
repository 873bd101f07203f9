//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration file management (init, show, path)
//! - [`install`] - Install one build, downloading it if needed
//! - [`list`] - Show installed builds
//! - [`sync`] - Bring mods up to their live builds
//! - [`uninstall`] - Remove every build of a mod

pub mod common;
pub mod config;
pub mod install;
pub mod list;
pub mod sync;
pub mod uninstall;
