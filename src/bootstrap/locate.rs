// src/bootstrap/locate.rs

//! Presence probes for prerequisites
//!
//! Binaries are searched in the inherited `PATH` followed by `<prefix>/bin`.
//! Libraries are recognized by their pkg-config file inside the prefix.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::trace;

/// pkg-config directories scanned below the prefix
const PKGCONFIG_DIRS: &[&str] = &["lib/pkgconfig", "lib64/pkgconfig", "share/pkgconfig"];

/// How to tell whether a prerequisite is installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// An executable found on the search path
    Binary(String),
    /// A library that installs `<name>.pc`
    Library(String),
}

impl Presence {
    pub fn name(&self) -> &str {
        match self {
            Self::Binary(name) | Self::Library(name) => name,
        }
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary(name) => write!(f, "binary '{}'", name),
            Self::Library(name) => write!(f, "library '{}'", name),
        }
    }
}

/// Answers presence questions; swapped out in tests
pub trait Locator: Send + Sync {
    /// Full path of `binary` when it can be executed
    fn find_binary(&self, binary: &str) -> Option<PathBuf>;

    /// pkg-config file of `library` when it is installed
    fn find_library(&self, library: &str) -> Option<PathBuf>;

    fn is_present(&self, presence: &Presence) -> bool {
        match presence {
            Presence::Binary(name) => self.find_binary(name).is_some(),
            Presence::Library(name) => self.find_library(name).is_some(),
        }
    }
}

/// Probes the real filesystem
#[derive(Debug, Clone)]
pub struct PrefixLocator {
    prefix: PathBuf,
    search_path: OsString,
}

impl PrefixLocator {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let search_path = search_path(&prefix);
        Self { prefix, search_path }
    }

    /// The `PATH` used for lookups and handed to child processes
    pub fn search_path(&self) -> &OsString {
        &self.search_path
    }
}

impl Locator for PrefixLocator {
    fn find_binary(&self, binary: &str) -> Option<PathBuf> {
        let found = which::which_in(binary, Some(&self.search_path), &self.prefix).ok();
        trace!("Looking up {}: {:?}", binary, found);
        found
    }

    fn find_library(&self, library: &str) -> Option<PathBuf> {
        let file_name = format!("{}.pc", library);
        let found = PKGCONFIG_DIRS
            .iter()
            .map(|dir| self.prefix.join(dir).join(&file_name))
            .find(|candidate| candidate.is_file());
        trace!("Looking up {}: {:?}", file_name, found);
        found
    }
}

/// Inherited `PATH` with `<prefix>/bin` appended
pub fn search_path(prefix: &Path) -> OsString {
    let prefix_bin = prefix.join("bin");
    let mut entries: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default();
    if !entries.contains(&prefix_bin) {
        entries.push(prefix_bin);
    }
    std::env::join_paths(entries).unwrap_or_else(|_| prefix.join("bin").into_os_string())
}
