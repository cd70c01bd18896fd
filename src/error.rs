// src/error.rs

//! Error and outcome types shared by every stage of the bootstrap
//!
//! Failures travel as [`Error`]. Cancellation is not a failure: operations
//! that can be interrupted return [`Outcome`] inside the `Ok` branch so the
//! caller can tell "stopped on request" apart from "went wrong".

use crate::bootstrap::BuildStepKind;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Result of an operation that may be cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    /// The operation ran to completion
    Completed(T),
    /// The operation stopped because cancellation was requested
    Cancelled,
}

impl<T> Outcome<T> {
    /// Whether the operation was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the operation completed
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Convert into an `Option`, dropping the cancellation marker
    #[cfg(test)]
    pub(crate) fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }
}

/// Unwrap an `Outcome`, returning `Ok(Outcome::Cancelled)` from the
/// enclosing function when it was cancelled.
#[macro_export]
macro_rules! proceed {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Completed(value) => value,
            $crate::Outcome::Cancelled => return Ok($crate::Outcome::Cancelled),
        }
    };
}

/// A build step whose process exited non-zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    /// Prerequisite or module being built
    pub module: String,
    /// Step that failed
    pub step: BuildStepKind,
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout, `None` when output was not captured
    pub stdout: Option<String>,
    /// Captured stderr, `None` when output was not captured
    pub stderr: Option<String>,
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "build failure in module '{}' in step {}", self.module, self.step)?;
        match self.exit_code {
            Some(code) => write!(f, " (exit code {})", code)?,
            None => write!(f, " (terminated by signal)")?,
        }
        write!(f, ". Stdout was: {}", captured(&self.stdout))?;
        write!(f, ". Stderr was: {}", captured(&self.stderr))
    }
}

fn captured(stream: &Option<String>) -> String {
    match stream {
        Some(text) => format!("'{}'", text),
        None => "unavailable".to_string(),
    }
}

/// Errors raised while bootstrapping
#[derive(Debug, Error)]
pub enum Error {
    /// A tool this crate cannot build itself is absent
    #[error("required system binary '{binary}' not found: {reason}")]
    MissingSystemBinary { binary: String, reason: String },

    /// The transfer itself failed (network, HTTP status, local write)
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// Downloaded content does not match the expected checksum
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The transfer produced a zero-byte file
    #[error("download of {url} produced an empty file")]
    EmptyDownload { url: String },

    /// The extraction destination conflicts with the archive
    #[error("cannot extract into {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    /// A prerequisite build step exited non-zero
    #[error("{0}")]
    Build(Box<BuildFailure>),

    /// The build manager failed to build the requested module
    #[error("module '{module}' failed to build. Stdout was: {stdout}. Stderr was: {stderr}", stdout = captured(.stdout), stderr = captured(.stderr))]
    ModuleBuild {
        module: String,
        stdout: Option<String>,
        stderr: Option<String>,
    },

    /// A source patch did not apply
    #[error("patch {patch} failed to apply to {module}: {stderr}", stderr = captured(.stderr))]
    PatchFailed {
        module: String,
        patch: PathBuf,
        stderr: Option<String>,
    },

    /// A checkout directory exists but is not a usable source root
    #[error(
        "the clone directory '{0}' already exists, is not empty and is not a valid git \
         source root. This might be the result of a failing previous checkout. Check and \
         eventually delete the directory or choose another download directory."
    )]
    InvalidCheckout(PathBuf),

    /// A caller-supplied argument is unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant was broken (e.g. a build succeeded but its
    /// binary still cannot be found)
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem or process I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from the transfer layer and may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Download { .. } | Self::Io(_))
    }
}

impl From<BuildFailure> for Error {
    fn from(failure: BuildFailure) -> Self {
        Self::Build(Box::new(failure))
    }
}
