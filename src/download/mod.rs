// src/download/mod.rs

//! Download, verify and extract prerequisite sources
//!
//! A [`DownloadSpec`] names a URL, where the file goes, its expected
//! checksum and how to unpack it. [`Downloader::fetch`] makes sure the file
//! is present and intact, asking the configured [`FetchPolicies`] whenever
//! an attempt fails, then extracts it.
//!
//! Extraction is skipped when the destination directory already exists and
//! is not empty. The contents are not verified, so a partially extracted
//! tree left behind by an interrupted run is treated as complete; delete
//! the directory to force a fresh extraction.

mod client;
mod policy;

pub use client::{HttpTransport, Transport};
pub use policy::{DEFAULT_ATTEMPTS, FetchPolicies, Reaction, RetryContext, RetryPolicy, RetryReason};

use crate::archive::{self, ArchiveKind};
use crate::checksum;
use crate::error::{Error, Outcome, Result};
use crate::process::CancellationState;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One file to fetch and, optionally, unpack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSpec {
    /// Primary source URL
    pub url: String,
    /// Fallback URLs tried in order after a transport failure
    pub mirrors: Vec<String>,
    /// Where the downloaded file is stored
    pub target: PathBuf,
    pub kind: ArchiveKind,
    /// Directory the archive unpacks into; unused for [`ArchiveKind::None`]
    pub destination: PathBuf,
    /// Expected hex checksum, empty to skip verification
    pub checksum: String,
}

impl DownloadSpec {
    /// Describe an archive stored as `<download_dir>/<file name of url>` that
    /// unpacks to `<download_dir>/<dir_name>`
    pub fn archive(url: &str, download_dir: &Path, dir_name: &str, checksum: &str) -> Self {
        let file_name = url.rsplit('/').next().unwrap_or(url);
        Self {
            url: url.to_string(),
            mirrors: Vec::new(),
            target: download_dir.join(file_name),
            kind: ArchiveKind::from_file_name(file_name),
            destination: download_dir.join(dir_name),
            checksum: checksum.to_string(),
        }
    }

    /// A plain file (a patch, say) stored under `download_dir`
    pub fn file(url: &str, download_dir: &Path, checksum: &str) -> Self {
        let file_name = url.rsplit('/').next().unwrap_or(url);
        let target = download_dir.join(file_name);
        Self {
            url: url.to_string(),
            mirrors: Vec::new(),
            destination: target.clone(),
            target,
            kind: ArchiveKind::None,
            checksum: checksum.to_string(),
        }
    }

    pub fn with_mirror(mut self, url: impl Into<String>) -> Self {
        self.mirrors.push(url.into());
        self
    }

    /// URL to use for the given attempt, cycling through the mirrors
    pub fn url_for_attempt(&self, attempt: usize) -> &str {
        let count = self.mirrors.len() + 1;
        match attempt % count {
            0 => &self.url,
            n => &self.mirrors[n - 1],
        }
    }
}

/// What a completed fetch had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fetched {
    /// A transfer took place (false when a verified file was reused)
    pub downloaded: bool,
    /// The archive was extracted (false when already extracted or not an archive)
    pub extracted: bool,
}

/// Fetches [`DownloadSpec`]s through a [`Transport`]
pub struct Downloader {
    transport: Box<dyn Transport>,
    policies: FetchPolicies,
    skip_checksum: bool,
    cancellation: Arc<CancellationState>,
}

impl Downloader {
    pub fn new(transport: Box<dyn Transport>, cancellation: Arc<CancellationState>) -> Self {
        Self {
            transport,
            policies: FetchPolicies::default(),
            skip_checksum: false,
            cancellation,
        }
    }

    pub fn with_policies(mut self, policies: FetchPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Reuse any existing target file without verifying it
    pub fn with_skip_checksum(mut self, skip: bool) -> Self {
        self.skip_checksum = skip;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Make sure `spec.target` is present and intact, then extract it
    ///
    /// Returns `Outcome::Cancelled` when cancellation was requested or a
    /// policy chose to give up. Extraction errors are never retried.
    pub fn fetch(&self, spec: &DownloadSpec) -> Result<Outcome<Fetched>> {
        let mut failures: u32 = 0;

        loop {
            let url = spec.url_for_attempt(failures as usize);
            let error = match self.fetch_from(spec, url) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            failures += 1;
            let context = RetryContext {
                url,
                attempts: failures,
                reason: RetryReason::TransportFailure(&error),
            };
            match self.policies.on_failure.decide(&context) {
                Reaction::Retry => {
                    let next = spec.url_for_attempt(failures as usize);
                    warn!("Fetching {} failed ({}), retrying from {}", url, error, next);
                }
                Reaction::Cancel => {
                    warn!("Fetching {} failed ({}), giving up after {} attempts", url, error, failures);
                    return Ok(Outcome::Cancelled);
                }
            }
        }
    }

    fn fetch_from(&self, spec: &DownloadSpec, url: &str) -> Result<Outcome<Fetched>> {
        if self.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let mut fetched = Fetched::default();
        if self.needs_download(spec)? {
            match self.download_verified(spec, url)? {
                Outcome::Completed(()) => fetched.downloaded = true,
                Outcome::Cancelled => return Ok(Outcome::Cancelled),
            }
        } else {
            debug!("Reusing {}", spec.target.display());
        }

        if spec.kind == ArchiveKind::None {
            return Ok(Outcome::Completed(fetched));
        }
        if self.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        fetched.extracted = self.extract_if_needed(spec)?;
        Ok(Outcome::Completed(fetched))
    }

    fn needs_download(&self, spec: &DownloadSpec) -> Result<bool> {
        if !spec.target.exists() {
            return Ok(true);
        }
        if self.skip_checksum {
            return Ok(false);
        }
        if spec.checksum.is_empty() {
            // Nothing to compare against, so a stale file cannot be told apart
            return Ok(true);
        }

        let actual = checksum::checksum_file(&spec.target)?;
        if checksum::matches(&spec.checksum, &actual) {
            debug!("{} of {} matches", checksum::ALGORITHM, spec.target.display());
            Ok(false)
        } else {
            debug!(
                "{} of {} is {} (expected {}), downloading again",
                checksum::ALGORITHM,
                spec.target.display(),
                actual,
                spec.checksum
            );
            Ok(true)
        }
    }

    /// Transfer until the file is non-empty and matches its checksum, or a
    /// policy gives up
    fn download_verified(&self, spec: &DownloadSpec, url: &str) -> Result<Outcome<()>> {
        if let Some(parent) = spec.target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut empty_attempts: u32 = 0;
        let mut mismatch_attempts: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }

            let cancelled = || self.cancellation.is_cancelled();
            if self.transport.transfer(url, &spec.target, &cancelled)?.is_cancelled() || self.is_cancelled() {
                debug!("Download of {} cancelled", url);
                return Ok(Outcome::Cancelled);
            }

            let size = fs::metadata(&spec.target)?.len();
            if size == 0 {
                empty_attempts += 1;
                let context = RetryContext {
                    url,
                    attempts: empty_attempts,
                    reason: RetryReason::EmptyDownload,
                };
                match self.policies.on_empty_download.decide(&context) {
                    Reaction::Retry => {
                        warn!("{} downloaded an empty file, retrying", url);
                        continue;
                    }
                    Reaction::Cancel => {
                        warn!("{}", Error::EmptyDownload { url: url.to_string() });
                        return Ok(Outcome::Cancelled);
                    }
                }
            }

            if spec.checksum.is_empty() {
                return Ok(Outcome::Completed(()));
            }

            let actual = checksum::checksum_file(&spec.target)?;
            if checksum::matches(&spec.checksum, &actual) {
                debug!("{} verified for {}", checksum::ALGORITHM, spec.target.display());
                return Ok(Outcome::Completed(()));
            }

            mismatch_attempts += 1;
            let context = RetryContext {
                url,
                attempts: mismatch_attempts,
                reason: RetryReason::ChecksumMismatch {
                    expected: &spec.checksum,
                    actual: &actual,
                },
            };
            let mismatch = Error::ChecksumMismatch {
                path: spec.target.clone(),
                expected: spec.checksum.clone(),
                actual: actual.clone(),
            };
            match self.policies.on_checksum_mismatch.decide(&context) {
                Reaction::Retry => warn!("{}, retrying", mismatch),
                Reaction::Cancel => {
                    warn!("{}, giving up after {} attempts", mismatch, mismatch_attempts);
                    return Ok(Outcome::Cancelled);
                }
            }
        }
    }

    /// Extract unless the destination already holds something
    fn extract_if_needed(&self, spec: &DownloadSpec) -> Result<bool> {
        let destination = &spec.destination;
        if destination.exists() {
            if !destination.is_dir() {
                return Err(Error::Extraction {
                    path: destination.clone(),
                    reason: "destination exists and is not a directory".to_string(),
                });
            }
            if fs::read_dir(destination)?.next().is_some() {
                debug!("{} is not empty, assuming it is already extracted", destination.display());
                return Ok(false);
            }
        }

        info!("Extracting {} into {}", spec.target.display(), destination.display());
        archive::extract_file(&spec.target, spec.kind, destination)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Serves a fixed body and records every URL requested
    struct StaticTransport {
        body: Vec<u8>,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for StaticTransport {
        fn transfer(&self, url: &str, target: &Path, _: &dyn Fn() -> bool) -> Result<Outcome<u64>> {
            self.requests.lock().push(url.to_string());
            fs::write(target, &self.body)?;
            Ok(Outcome::Completed(self.body.len() as u64))
        }
    }

    /// Fails every transfer
    struct FailingTransport {
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for FailingTransport {
        fn transfer(&self, url: &str, _: &Path, _: &dyn Fn() -> bool) -> Result<Outcome<u64>> {
            self.requests.lock().push(url.to_string());
            Err(Error::Download {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn downloader(transport: impl Transport + 'static) -> Downloader {
        Downloader::new(Box::new(transport), CancellationState::new())
    }

    #[test]
    fn test_spec_constructors() {
        let dir = Path::new("/cache");
        let spec = DownloadSpec::archive("https://example.org/src/foo-1.0.tar.xz", dir, "foo-1.0", "");
        assert_eq!(spec.target, PathBuf::from("/cache/foo-1.0.tar.xz"));
        assert_eq!(spec.destination, PathBuf::from("/cache/foo-1.0"));
        assert_eq!(spec.kind, ArchiveKind::TarXz);

        let patch = DownloadSpec::file("https://example.org/fix.patch", dir, "");
        assert_eq!(patch.kind, ArchiveKind::None);
        assert_eq!(patch.target, PathBuf::from("/cache/fix.patch"));
    }

    #[test]
    fn test_url_rotation() {
        let spec = DownloadSpec::file("https://a/x", Path::new("/c"), "")
            .with_mirror("https://b/x")
            .with_mirror("https://c/x");
        assert_eq!(spec.url_for_attempt(0), "https://a/x");
        assert_eq!(spec.url_for_attempt(1), "https://b/x");
        assert_eq!(spec.url_for_attempt(2), "https://c/x");
        assert_eq!(spec.url_for_attempt(3), "https://a/x");
    }

    #[test]
    fn test_plain_file_download() {
        let temp = TempDir::new().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let body = b"--- a\n+++ b\n".to_vec();
        let spec = DownloadSpec::file(
            "https://example.org/fix.patch",
            temp.path(),
            &checksum::checksum_bytes(&body),
        );

        let fetched = downloader(StaticTransport {
            body: body.clone(),
            requests: Arc::clone(&requests),
        })
        .fetch(&spec)
        .unwrap();

        assert_eq!(
            fetched,
            Outcome::Completed(Fetched {
                downloaded: true,
                extracted: false
            })
        );
        assert_eq!(fs::read(&spec.target).unwrap(), body);
        assert_eq!(requests.lock().len(), 1);
    }

    #[test]
    fn test_transport_failure_rotates_mirrors_then_gives_up() {
        let temp = TempDir::new().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let spec = DownloadSpec::file("https://primary/x.patch", temp.path(), "")
            .with_mirror("https://mirror/x.patch");

        let outcome = downloader(FailingTransport {
            requests: Arc::clone(&requests),
        })
        .with_policies(FetchPolicies::default().with_on_failure(RetryPolicy::RetryUpTo(3)))
        .fetch(&spec)
        .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(
            *requests.lock(),
            vec!["https://primary/x.patch", "https://mirror/x.patch", "https://primary/x.patch"]
        );
    }

    #[test]
    fn test_empty_download_policy() {
        let temp = TempDir::new().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let spec = DownloadSpec::file("https://example.org/empty", temp.path(), "");

        let outcome = downloader(StaticTransport {
            body: Vec::new(),
            requests: Arc::clone(&requests),
        })
        .with_policies(FetchPolicies::default().with_on_empty_download(RetryPolicy::RetryUpTo(2)))
        .fetch(&spec)
        .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(requests.lock().len(), 2);
    }

    #[test]
    fn test_cancelled_before_transfer() {
        let temp = TempDir::new().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let cancellation = CancellationState::new();
        cancellation.cancel();

        let downloader = Downloader::new(
            Box::new(StaticTransport {
                body: b"data".to_vec(),
                requests: Arc::clone(&requests),
            }),
            cancellation,
        );
        let spec = DownloadSpec::file("https://example.org/data", temp.path(), "");

        assert!(downloader.fetch(&spec).unwrap().is_cancelled());
        assert!(requests.lock().is_empty());
    }

    #[test]
    fn test_destination_file_is_extraction_error() {
        let temp = TempDir::new().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let spec = DownloadSpec::archive("https://example.org/foo-1.0.tar.gz", temp.path(), "foo-1.0", "");
        fs::write(&spec.destination, b"in the way").unwrap();

        let err = downloader(StaticTransport {
            body: b"not really an archive".to_vec(),
            requests: Arc::clone(&requests),
        })
        .fetch(&spec)
        .unwrap_err();

        assert!(matches!(err, Error::Extraction { .. }));
        assert_eq!(requests.lock().len(), 1);
    }

    #[test]
    fn test_skip_checksum_reuses_existing_file() {
        let temp = TempDir::new().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let spec = DownloadSpec::file("https://example.org/data", temp.path(), "0123456789abcdef0123456789abcdef");
        fs::write(&spec.target, b"stale").unwrap();

        let fetched = downloader(StaticTransport {
            body: b"fresh".to_vec(),
            requests: Arc::clone(&requests),
        })
        .with_skip_checksum(true)
        .fetch(&spec)
        .unwrap();

        assert_eq!(fetched, Outcome::Completed(Fetched::default()));
        assert!(requests.lock().is_empty());
        assert_eq!(fs::read(&spec.target).unwrap(), b"stale");
    }
}
