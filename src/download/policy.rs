// src/download/policy.rs

//! Retry decisions for downloads
//!
//! The downloader never decides on its own whether to try again. Each
//! decision point asks a [`RetryPolicy`], which is either one of the
//! automated strategies or a caller-supplied handler (for example a prompt).

use crate::error::Error;
use std::fmt;

/// Default number of attempts for each decision point
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Retry,
    Cancel,
}

/// Why an attempt failed
#[derive(Debug)]
pub enum RetryReason<'a> {
    /// The transfer itself failed
    TransportFailure(&'a Error),
    /// The file arrived but its checksum is wrong
    ChecksumMismatch { expected: &'a str, actual: &'a str },
    /// The file arrived empty
    EmptyDownload,
}

/// Everything a policy gets to see when deciding
#[derive(Debug)]
pub struct RetryContext<'a> {
    /// URL of the failed attempt
    pub url: &'a str,
    /// Attempts made so far for this decision point, starting at 1
    pub attempts: u32,
    pub reason: RetryReason<'a>,
}

type Handler = Box<dyn Fn(&RetryContext<'_>) -> Reaction + Send + Sync>;

/// Strategy for one decision point
pub enum RetryPolicy {
    /// Allow at most this many attempts in total, then cancel
    RetryUpTo(u32),
    AlwaysRetry,
    AlwaysCancel,
    /// Ask a caller-supplied handler
    Interactive(Handler),
}

impl RetryPolicy {
    /// Wrap a closure as an interactive policy
    pub fn interactive<F>(handler: F) -> Self
    where
        F: Fn(&RetryContext<'_>) -> Reaction + Send + Sync + 'static,
    {
        Self::Interactive(Box::new(handler))
    }

    pub fn decide(&self, context: &RetryContext<'_>) -> Reaction {
        match self {
            Self::RetryUpTo(limit) => {
                if context.attempts < *limit {
                    Reaction::Retry
                } else {
                    Reaction::Cancel
                }
            }
            Self::AlwaysRetry => Reaction::Retry,
            Self::AlwaysCancel => Reaction::Cancel,
            Self::Interactive(handler) => handler(context),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::RetryUpTo(DEFAULT_ATTEMPTS)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryUpTo(limit) => f.debug_tuple("RetryUpTo").field(limit).finish(),
            Self::AlwaysRetry => f.write_str("AlwaysRetry"),
            Self::AlwaysCancel => f.write_str("AlwaysCancel"),
            Self::Interactive(_) => f.write_str("Interactive(..)"),
        }
    }
}

/// The three decision points of a fetch
#[derive(Debug, Default)]
pub struct FetchPolicies {
    /// Transport failure; a retry moves on to the next mirror
    pub on_failure: RetryPolicy,
    pub on_checksum_mismatch: RetryPolicy,
    pub on_empty_download: RetryPolicy,
}

impl FetchPolicies {
    /// The same policy at every decision point
    pub fn uniform(attempts: u32) -> Self {
        Self {
            on_failure: RetryPolicy::RetryUpTo(attempts),
            on_checksum_mismatch: RetryPolicy::RetryUpTo(attempts),
            on_empty_download: RetryPolicy::RetryUpTo(attempts),
        }
    }

    pub fn with_on_failure(mut self, policy: RetryPolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn with_on_checksum_mismatch(mut self, policy: RetryPolicy) -> Self {
        self.on_checksum_mismatch = policy;
        self
    }

    pub fn with_on_empty_download(mut self, policy: RetryPolicy) -> Self {
        self.on_empty_download = policy;
        self
    }
}
