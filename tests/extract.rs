// tests/extract.rs

//! Archive extraction into a download directory

mod common;

use common::{Entry, MTIME, tar_gz, tar_xz, zip_archive};
use filetime::FileTime;
use jhbuild_bootstrap::Error;
use jhbuild_bootstrap::archive::{ArchiveKind, extract, symbolic_mode};
use std::fs;
use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

fn tool_entries() -> Vec<Entry<'static>> {
    vec![
        Entry::dir("tool-2.0/"),
        Entry::dir("tool-2.0/bin/"),
        Entry::file("tool-2.0/bin/tool", b"#!/bin/sh\necho tool\n", 0o755),
        Entry::file("tool-2.0/NEWS", b"2.0\n", 0o644),
    ]
}

#[test]
fn test_tar_gz_restores_mode_and_mtime() {
    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("tool-2.0");

    extract(Cursor::new(tar_gz(&tool_entries())), ArchiveKind::TarGz, &destination).unwrap();

    let tool = destination.join("bin/tool");
    let metadata = fs::metadata(&tool).unwrap();
    assert_eq!(metadata.permissions().mode() & 0o777, 0o755);
    assert_eq!(symbolic_mode(metadata.permissions().mode()), "rwxr-xr-x");
    assert_eq!(FileTime::from_last_modification_time(&metadata).unix_seconds(), MTIME as i64);

    let news = fs::metadata(destination.join("NEWS")).unwrap();
    assert_eq!(news.permissions().mode() & 0o777, 0o644);

    // directory times are applied after their contents were written
    let bin = fs::metadata(destination.join("bin")).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&bin).unix_seconds(), MTIME as i64);
}

#[test]
fn test_tar_xz() {
    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("tool-2.0");

    extract(Cursor::new(tar_xz(&tool_entries())), ArchiveKind::TarXz, &destination).unwrap();

    assert_eq!(fs::read_to_string(destination.join("NEWS")).unwrap(), "2.0\n");
    assert!(destination.join("bin/tool").is_file());
}

#[test]
fn test_zip_restores_mtime() {
    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("tool-2.0");

    extract(Cursor::new(zip_archive(&tool_entries())), ArchiveKind::Zip, &destination).unwrap();

    let news = fs::metadata(destination.join("NEWS")).unwrap();
    // 2017-07-14 02:40:00 UTC
    assert_eq!(FileTime::from_last_modification_time(&news).unix_seconds(), 1_500_000_000);
    assert!(destination.join("bin").is_dir());
}

#[test]
fn test_entry_escaping_root_is_rejected() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    fs::create_dir_all(&root).unwrap();
    let destination = root.join("evil-1.0");

    // tar::Header::set_path refuses "..", so write the name bytes directly
    let mut header = tar::Header::new_gnu();
    {
        let gnu = header.as_gnu_mut().unwrap();
        let name = b"../escaped";
        gnu.name[..name.len()].copy_from_slice(name);
    }
    header.set_mode(0o644);
    header.set_size(4);
    header.set_mtime(MTIME);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default()));
    builder.append(&header, &b"evil"[..]).unwrap();
    let archive = builder.into_inner().unwrap().finish().unwrap();

    let err = extract(Cursor::new(archive), ArchiveKind::TarGz, &destination).unwrap_err();
    assert!(matches!(err, Error::Extraction { .. }));
    assert!(!temp.path().join("escaped").exists());
}
