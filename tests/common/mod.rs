// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use jhbuild_bootstrap::bootstrap::Locator;
use jhbuild_bootstrap::download::Transport;
use jhbuild_bootstrap::{Error, Outcome, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xz2::write::XzEncoder;
use zip::write::SimpleFileOptions;

/// Modification time stamped on every synthesized archive entry
pub const MTIME: u64 = 1_500_000_000;

/// One archive member: path, content and mode. A path ending in `/` is a directory.
pub struct Entry<'a> {
    pub path: &'a str,
    pub data: &'a [u8],
    pub mode: u32,
}

impl<'a> Entry<'a> {
    pub fn file(path: &'a str, data: &'a [u8], mode: u32) -> Self {
        Self { path, data, mode }
    }

    pub fn dir(path: &'a str) -> Self {
        Self {
            path,
            data: b"",
            mode: 0o755,
        }
    }
}

fn write_tar<W: Write>(writer: W, entries: &[Entry<'_>]) -> W {
    let mut builder = tar::Builder::new(writer);
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_path(entry.path).unwrap();
        header.set_mode(entry.mode);
        header.set_mtime(MTIME);
        if entry.path.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(entry.data.len() as u64);
        }
        header.set_cksum();
        builder.append(&header, entry.data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// A gzip-compressed tarball
pub fn tar_gz(entries: &[Entry<'_>]) -> Vec<u8> {
    let encoder = write_tar(GzEncoder::new(Vec::new(), Compression::default()), entries);
    encoder.finish().unwrap()
}

/// An xz-compressed tarball
pub fn tar_xz(entries: &[Entry<'_>]) -> Vec<u8> {
    let encoder = write_tar(XzEncoder::new(Vec::new(), 6), entries);
    encoder.finish().unwrap()
}

/// A zip archive whose entries are stamped 2017-07-14 02:40:00
pub fn zip_archive(entries: &[Entry<'_>]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let stamp = zip::DateTime::from_date_and_time(2017, 7, 14, 2, 40, 0).unwrap();
    let options = SimpleFileOptions::default().last_modified_time(stamp);
    for entry in entries {
        if entry.path.ends_with('/') {
            writer.add_directory(entry.path, options).unwrap();
        } else {
            writer.start_file(entry.path, options).unwrap();
            writer.write_all(entry.data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Serves fixed bodies by URL and records every request
#[derive(Clone, Default)]
pub struct MapTransport {
    bodies: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MapTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.lock().insert(url.to_string(), body);
        self
    }

    /// Number of transfers so far
    pub fn transfers(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl Transport for MapTransport {
    fn transfer(&self, url: &str, target: &Path, is_cancelled: &dyn Fn() -> bool) -> Result<Outcome<u64>> {
        self.requests.lock().push(url.to_string());
        if is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        let body = self.bodies.lock().get(url).cloned().ok_or_else(|| Error::Download {
            url: url.to_string(),
            message: "HTTP 404 Not Found".to_string(),
        })?;
        fs::write(target, &body)?;
        Ok(Outcome::Completed(body.len() as u64))
    }
}

/// Treats a name as present when it is listed or installed in `<prefix>/bin`
pub struct FakeLocator {
    prefix: PathBuf,
    present: HashSet<String>,
}

impl FakeLocator {
    pub fn new(prefix: &Path, present: &[&str]) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            present: present.iter().map(|name| name.to_string()).collect(),
        }
    }
}

impl Locator for FakeLocator {
    fn find_binary(&self, binary: &str) -> Option<PathBuf> {
        let installed = self.prefix.join("bin").join(binary);
        if installed.is_file() {
            Some(installed)
        } else if self.present.contains(binary) {
            Some(PathBuf::from("/usr/bin").join(binary))
        } else {
            None
        }
    }

    fn find_library(&self, library: &str) -> Option<PathBuf> {
        let pc = self.prefix.join("lib/pkgconfig").join(format!("{}.pc", library));
        if pc.is_file() || self.present.contains(library) {
            Some(pc)
        } else {
            None
        }
    }
}
