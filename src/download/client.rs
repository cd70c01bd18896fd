// src/download/client.rs

//! HTTP transport for prerequisite downloads
//!
//! Streams a URL to disk in fixed-size chunks, checking for cancellation
//! between chunks. Data lands in a `.part` file that is renamed over the
//! target only once the transfer completed.

use crate::error::{Error, Outcome, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Timeout for establishing a connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a whole request; source tarballs can be large
const HTTP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Moves the bytes behind a URL into a local file
pub trait Transport: Send + Sync {
    /// Write the content of `url` to `target`
    ///
    /// `is_cancelled` is polled while the transfer runs; when it returns
    /// true the transfer stops and `Outcome::Cancelled` is returned. On
    /// completion the number of bytes written is returned.
    fn transfer(&self, url: &str, target: &Path, is_cancelled: &dyn Fn() -> bool) -> Result<Outcome<u64>>;
}

/// Blocking reqwest transport
pub struct HttpTransport {
    client: Client,
    show_progress: bool,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            show_progress: false,
        })
    }

    /// Draw a byte progress bar on stderr while transferring
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, total_size: u64, name: &str) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(total_size);
        let template = if total_size > 0 {
            "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}"
        } else {
            "{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}"
        };
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(name.to_string());
        Some(pb)
    }
}

impl Transport for HttpTransport {
    fn transfer(&self, url: &str, target: &Path, is_cancelled: &dyn Fn() -> bool) -> Result<Outcome<u64>> {
        info!("Downloading {} to {}", url, target.display());

        let download_error = |message: String| Error::Download {
            url: url.to_string(),
            message,
        };

        let parsed = Url::parse(url).map_err(|e| download_error(format!("invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(download_error(format!("unsupported scheme '{}'", parsed.scheme())));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .map_err(|e| download_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_error(format!("HTTP {}", response.status())));
        }

        let total_size = response.content_length().unwrap_or(0);
        let name = target
            .file_name()
            .map_or_else(|| url.to_string(), |n| n.to_string_lossy().into_owned());
        let progress_bar = self.progress_bar(total_size, &name);

        let temp_path = part_path(target);
        let mut file = File::create(&temp_path)?;
        let streamed = stream_response_to_file(response, &mut file, progress_bar.as_ref(), is_cancelled);
        drop(file);

        let downloaded = match streamed {
            Ok(Outcome::Completed(bytes)) => bytes,
            Ok(Outcome::Cancelled) => {
                debug!("Transfer of {} cancelled", url);
                if let Some(pb) = &progress_bar {
                    pb.abandon_with_message(format!("{} [cancelled]", name));
                }
                remove_partial(&temp_path);
                return Ok(Outcome::Cancelled);
            }
            Err(e) => {
                if let Some(pb) = &progress_bar {
                    pb.abandon_with_message(format!("{} [failed]", name));
                }
                remove_partial(&temp_path);
                return Err(e.into_download(url));
            }
        };

        if let Some(pb) = &progress_bar {
            pb.finish_with_message(format!("{} [done]", name));
        }

        fs::rename(&temp_path, target)?;
        info!("Downloaded {} bytes to {}", downloaded, target.display());
        Ok(Outcome::Completed(downloaded))
    }
}

/// Stream an HTTP response into `file`, never buffering the whole body
fn stream_response_to_file(
    mut response: reqwest::blocking::Response,
    file: &mut File,
    progress_bar: Option<&ProgressBar>,
    is_cancelled: &dyn Fn() -> bool,
) -> std::result::Result<Outcome<u64>, StreamError> {
    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        if is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let bytes_read = response.read(&mut buffer).map_err(StreamError::Read)?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).map_err(StreamError::Write)?;
        downloaded += bytes_read as u64;

        if let Some(pb) = progress_bar {
            pb.set_position(downloaded);
        }
    }

    file.flush().map_err(StreamError::Write)?;
    Ok(Outcome::Completed(downloaded))
}

/// Network reads and local writes fail for different reasons
enum StreamError {
    Read(std::io::Error),
    Write(std::io::Error),
}

impl StreamError {
    fn into_download(self, url: &str) -> Error {
        match self {
            Self::Read(e) => Error::Download {
                url: url.to_string(),
                message: format!("failed to read response: {e}"),
            },
            Self::Write(e) => Error::Io(e),
        }
    }
}

/// Delete a partial download, logging anything but a missing file
fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Failed to remove partial download {}: {}", path.display(), e),
    }
}

/// `<target>.part`
fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path_keeps_extension() {
        assert_eq!(
            part_path(Path::new("/cache/perl-5.26.1.tar.gz")),
            PathBuf::from("/cache/perl-5.26.1.tar.gz.part")
        );
    }

    #[test]
    fn test_remove_partial() {
        let temp = tempfile::tempdir().unwrap();
        let partial = part_path(&temp.path().join("pkg.tar.gz"));
        fs::write(&partial, b"half").unwrap();

        remove_partial(&partial);
        assert!(!partial.exists());
        // already gone
        remove_partial(&partial);

        // a directory cannot be removed as a file; the error is only logged
        let dir = temp.path().join("stuck.part");
        fs::create_dir(&dir).unwrap();
        remove_partial(&dir);
        assert!(dir.is_dir());
    }

    #[test]
    fn test_client_builds() {
        let transport = HttpTransport::new().unwrap().with_progress(true);
        assert!(transport.progress_bar(1024, "pkg.tar.gz").is_some());
        let quiet = HttpTransport::new().unwrap();
        assert!(quiet.progress_bar(1024, "pkg.tar.gz").is_none());
    }

    #[test]
    fn test_rejects_unsupported_urls() {
        let temp = tempfile::tempdir().unwrap();
        let transport = HttpTransport::new().unwrap();
        let target = temp.path().join("file");
        let never = || false;

        let err = transport.transfer("not a url", &target, &never).unwrap_err();
        assert!(matches!(err, Error::Download { .. }));
        let err = transport.transfer("ftp://example.org/file", &target, &never).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
        assert!(!target.exists());
    }
}
