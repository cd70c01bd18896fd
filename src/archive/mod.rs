// src/archive/mod.rs

//! Source archive extraction
//!
//! Extracts tar+gzip, tar+xz and zip archives while reproducing the
//! permission bits and modification times stored in the archive. Build
//! systems compare timestamps (autotools regenerates `configure` when it
//! looks older than `configure.ac`), so an extraction that stamps every
//! file with the wall-clock time breaks the builds that follow.
//!
//! Archives are expected to contain a single top-level directory named like
//! the destination, so entries are written relative to the destination's
//! parent directory.

use crate::compression::{CompressionFormat, create_decoder};
use crate::error::{Error, Result};
use chrono::NaiveDate;
use filetime::FileTime;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::EntryType;
use tracing::{debug, trace};

/// Bytes read to recognize a compression format
const MAGIC_LEN: usize = 6;

/// Permission bits restored from archive entries (user/group/other rwx)
const PERMISSION_BITS: u32 = 0o777;

/// Archive formats a download can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// gzip-compressed tar
    TarGz,
    /// xz-compressed tar
    TarXz,
    /// zip
    Zip,
    /// Not an archive; the download is used as-is
    None,
}

impl ArchiveKind {
    /// Guess the archive kind from a file name
    pub fn from_file_name(name: &str) -> Self {
        if name.ends_with(".zip") {
            return Self::Zip;
        }
        let is_tar = name.ends_with(".tgz")
            || name.ends_with(".txz")
            || name.contains(".tar.");
        match CompressionFormat::from_extension(name) {
            CompressionFormat::Gzip if is_tar => Self::TarGz,
            CompressionFormat::Xz if is_tar => Self::TarXz,
            _ => Self::None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::TarXz => "tar.xz",
            Self::Zip => "zip",
            Self::None => "none",
        }
    }

    fn compression(&self) -> Option<CompressionFormat> {
        match self {
            Self::TarGz => Some(CompressionFormat::Gzip),
            Self::TarXz => Some(CompressionFormat::Xz),
            Self::Zip | Self::None => None,
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Render the permission bits of `mode` as `rwxr-xr-x`
///
/// # Examples
/// ```
/// use jhbuild_bootstrap::archive::symbolic_mode;
///
/// assert_eq!(symbolic_mode(0o755), "rwxr-xr-x");
/// assert_eq!(symbolic_mode(0o640), "rw-r-----");
/// ```
pub fn symbolic_mode(mode: u32) -> String {
    let mut out = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let triplet = (mode >> shift) & 0o7;
        out.push(if triplet & 0o4 != 0 { 'r' } else { '-' });
        out.push(if triplet & 0o2 != 0 { 'w' } else { '-' });
        out.push(if triplet & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// Extract an archive read from `stream` so that its top-level directory
/// lands at `destination`
///
/// Fails with [`Error::Extraction`] when `destination` exists and is not a
/// directory. Passing [`ArchiveKind::None`] is a caller bug and is reported
/// as [`Error::InvalidArgument`].
pub fn extract<R: Read + Seek>(stream: R, kind: ArchiveKind, destination: &Path) -> Result<()> {
    if destination.exists() && !destination.is_dir() {
        return Err(Error::Extraction {
            path: destination.to_path_buf(),
            reason: "destination exists and is not a directory".to_string(),
        });
    }

    let root = extraction_root(destination)?;
    fs::create_dir_all(&root)?;

    match kind {
        ArchiveKind::TarGz | ArchiveKind::TarXz => {
            let format = kind.compression().unwrap_or(CompressionFormat::None);
            debug!("Extracting {} archive into {}", kind, root.display());
            extract_tar(create_decoder(stream, format), &root)
        }
        ArchiveKind::Zip => {
            fs::create_dir_all(destination)?;
            debug!("Extracting zip archive into {}", root.display());
            extract_zip(stream, &root)
        }
        ArchiveKind::None => Err(Error::InvalidArgument(format!(
            "archive kind '{}' cannot be extracted to {}",
            kind,
            destination.display()
        ))),
    }
}

/// Open `archive` and extract it, see [`extract`]
///
/// For tarballs the compression is taken from the file's magic bytes when
/// they disagree with its name.
pub fn extract_file(archive: &Path, kind: ArchiveKind, destination: &Path) -> Result<()> {
    let mut file = File::open(archive)?;
    let kind = sniff_tar_kind(&mut file, kind)?;
    extract(io::BufReader::new(file), kind, destination)
}

fn sniff_tar_kind(file: &mut File, kind: ArchiveKind) -> Result<ArchiveKind> {
    if !matches!(kind, ArchiveKind::TarGz | ArchiveKind::TarXz) {
        return Ok(kind);
    }

    let mut magic = Vec::with_capacity(MAGIC_LEN);
    file.by_ref().take(MAGIC_LEN as u64).read_to_end(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    let sniffed = match CompressionFormat::from_magic_bytes(&magic) {
        CompressionFormat::Gzip => ArchiveKind::TarGz,
        CompressionFormat::Xz => ArchiveKind::TarXz,
        CompressionFormat::None => kind,
    };
    if sniffed != kind {
        debug!("Archive named as {} is actually {}", kind, sniffed);
    }
    Ok(sniffed)
}

fn extraction_root(destination: &Path) -> Result<PathBuf> {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        Some(_) => Ok(PathBuf::from(".")),
        None => Err(Error::Extraction {
            path: destination.to_path_buf(),
            reason: "destination has no parent directory".to_string(),
        }),
    }
}

/// Join an archive-relative path onto `root`, refusing anything that would
/// land outside of it. Returns `None` for the archive root itself.
fn contained_path(root: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let mut target = root.to_path_buf();
    let mut depth = 0usize;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                target.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Extraction {
                    path: root.join(relative),
                    reason: format!("entry '{}' escapes the extraction directory", relative.display()),
                });
            }
        }
    }

    Ok((depth > 0).then_some(target))
}

/// Metadata applied to directories once all of their children exist, so
/// that a read-only mode does not block extraction and writing children
/// does not clobber the restored time
struct DeferredDir {
    path: PathBuf,
    mode: Option<u32>,
    mtime: Option<FileTime>,
}

fn apply_deferred(mut dirs: Vec<DeferredDir>) -> Result<()> {
    // Deepest first
    dirs.sort_by(|a, b| b.path.components().count().cmp(&a.path.components().count()));
    for dir in dirs {
        if let Some(mode) = dir.mode {
            fs::set_permissions(&dir.path, fs::Permissions::from_mode(mode & PERMISSION_BITS))?;
        }
        if let Some(mtime) = dir.mtime {
            filetime::set_file_mtime(&dir.path, mtime)?;
        }
    }
    Ok(())
}

/// Remove whatever non-directory currently occupies `path`
fn clear_target(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(path),
        _ => Ok(()),
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn extract_tar<R: Read>(reader: R, root: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let mut deferred = Vec::new();
    let mut count = 0usize;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();

        if matches!(entry_type, EntryType::XGlobalHeader | EntryType::XHeader) {
            continue;
        }

        let relative = entry.path()?.into_owned();
        let Some(target) = contained_path(root, &relative)? else {
            continue;
        };
        let mode = entry.header().mode()?;
        let mtime = FileTime::from_unix_time(entry.header().mtime()? as i64, 0);

        match entry_type {
            EntryType::Directory => {
                trace!("Creating directory {}", target.display());
                clear_target(&target)?;
                fs::create_dir_all(&target)?;
                deferred.push(DeferredDir {
                    path: target,
                    mode: Some(mode),
                    mtime: Some(mtime),
                });
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                trace!("Writing {} ({})", target.display(), symbolic_mode(mode));
                create_parent(&target)?;
                clear_target(&target)?;
                let mut file = File::create(&target)?;
                io::copy(&mut entry, &mut file)?;
                drop(file);
                fs::set_permissions(&target, fs::Permissions::from_mode(mode & PERMISSION_BITS))?;
                filetime::set_file_mtime(&target, mtime)?;
            }
            EntryType::Symlink => {
                let Some(link) = entry.link_name()? else {
                    continue;
                };
                trace!("Linking {} -> {}", target.display(), link.display());
                create_parent(&target)?;
                clear_target(&target)?;
                std::os::unix::fs::symlink(&link, &target)?;
                filetime::set_symlink_file_times(&target, mtime, mtime)?;
            }
            EntryType::Link => {
                let Some(link) = entry.link_name()? else {
                    continue;
                };
                let Some(source) = contained_path(root, &link)? else {
                    continue;
                };
                trace!("Hard linking {} -> {}", target.display(), source.display());
                create_parent(&target)?;
                clear_target(&target)?;
                fs::hard_link(&source, &target)?;
            }
            other => {
                debug!("Skipping {:?} entry {}", other, relative.display());
                continue;
            }
        }
        count += 1;
    }

    apply_deferred(deferred)?;
    debug!("Extracted {} entries", count);
    Ok(())
}

fn extract_zip<R: Read + Seek>(reader: R, root: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| zip_error(root, e))?;
    let mut deferred = Vec::new();

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|e| zip_error(root, e))?;

        let Some(relative) = file.enclosed_name() else {
            return Err(Error::Extraction {
                path: root.to_path_buf(),
                reason: format!("entry '{}' escapes the extraction directory", file.name()),
            });
        };
        let Some(target) = contained_path(root, &relative)? else {
            continue;
        };
        let mtime = file.last_modified().and_then(zip_mtime);

        if file.is_dir() {
            trace!("Creating directory {}", target.display());
            fs::create_dir_all(&target)?;
            deferred.push(DeferredDir {
                path: target,
                mode: None,
                mtime,
            });
        } else {
            trace!("Writing {}", target.display());
            create_parent(&target)?;
            clear_target(&target)?;
            let mut out = File::create(&target)?;
            io::copy(&mut file, &mut out)?;
            drop(out);
            if let Some(mtime) = mtime {
                filetime::set_file_mtime(&target, mtime)?;
            }
        }
    }

    apply_deferred(deferred)?;
    debug!("Extracted {} zip entries", archive.len());
    Ok(())
}

fn zip_error(root: &Path, err: zip::result::ZipError) -> Error {
    match err {
        zip::result::ZipError::Io(e) => Error::Io(e),
        other => Error::Extraction {
            path: root.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

/// Zip stores local wall-clock fields without a zone; they are read as UTC
fn zip_mtime(stamp: zip::DateTime) -> Option<FileTime> {
    let seconds = NaiveDate::from_ymd_opt(
        i32::from(stamp.year()),
        u32::from(stamp.month()),
        u32::from(stamp.day()),
    )?
    .and_hms_opt(
        u32::from(stamp.hour()),
        u32::from(stamp.minute()),
        u32::from(stamp.second()),
    )?
    .and_utc()
    .timestamp();
    (seconds >= 0).then(|| FileTime::from_unix_time(seconds, 0))
}
