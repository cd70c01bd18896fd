// src/lib.rs

//! jhbuild bootstrap
//!
//! Installs jhbuild and the tools it needs into a user-owned prefix, then
//! drives jhbuild to build a module. Nothing needs root and nothing has to
//! be preinstalled beyond a C compiler, `make` and a POSIX shell.
//!
//! # Architecture
//!
//! - `download`: fetch source archives with checksum checks and retry policies
//! - `archive`: unpack tar.gz, tar.xz and zip while restoring modes and mtimes
//! - `process`: run build steps through the shell with cancellable waits
//! - `bootstrap`: the stage machine tying the above together
//!
//! Every long-running operation returns [`Outcome`] so that a cancellation
//! requested from another thread is reported as such and never as an error.

pub mod archive;
pub mod bootstrap;
pub mod checksum;
pub mod compression;
pub mod download;
mod error;
pub mod process;

pub use bootstrap::{Bootstrap, BootstrapConfig, BootstrapReport};
pub use error::{BuildFailure, Error, Outcome, Result};
