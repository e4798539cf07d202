//! Tarball packing and extraction for snapshots
//!
//! Snapshots are gzip-compressed POSIX tars with entries named by their
//! forward-slash relative paths, in manifest order. Symlinks and special
//! files are refused during both pack and extract, and extraction refuses
//! entries that would escape the project root.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

/// Pack `files` (relative paths, manifest order) from `root` into `dest`.
///
/// Files that vanished since the scan are skipped with a warning; a path that
/// turned into a symlink or special file is refused.
pub fn pack_files(root: &Path, files: &[String], dest: &Path) -> Result<()> {
    let out = File::create(dest).map_err(|e| archive_err("create", dest, &e))?;
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for rel in files {
        let full = root.join(rel);
        let metadata = match fs::symlink_metadata(&full) {
            Ok(md) => md,
            Err(_) => {
                tracing::warn!(path = %full.display(), "File vanished before packing; skipped");
                continue;
            }
        };
        if !metadata.is_file() {
            return Err(Error::Archive(format!(
                "refusing to pack non-regular file: {}",
                rel
            )));
        }
        let mut file = File::open(&full).map_err(|e| archive_err("open", &full, &e))?;
        builder
            .append_file(rel, &mut file)
            .map_err(|e| archive_err("append", &full, &e))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| archive_err("finalize", dest, &e))?;
    encoder
        .finish()
        .map_err(|e| archive_err("finish", dest, &e))?;
    Ok(())
}

/// Extract a snapshot tarball over the project root.
///
/// Returns the number of regular files written.
pub fn extract_archive(archive: &Path, root: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| archive_err("open", archive, &e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    let mut written = 0usize;
    let entries = tar
        .entries()
        .map_err(|e| archive_err("read", archive, &e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_err("read entry", archive, &e))?;
        let kind = entry.header().entry_type();
        if !matches!(kind, tar::EntryType::Regular | tar::EntryType::Directory) {
            return Err(Error::Archive(format!(
                "refusing non-regular archive entry ({:?}): {}",
                kind,
                entry.path().map(|p| p.display().to_string()).unwrap_or_default()
            )));
        }

        // unpack_in refuses absolute paths and any `..` escape.
        let unpacked = entry
            .unpack_in(root)
            .map_err(|e| archive_err("unpack", archive, &e))?;
        if !unpacked {
            return Err(Error::Archive(format!(
                "archive entry escapes project root: {}",
                entry.path().map(|p| p.display().to_string()).unwrap_or_default()
            )));
        }
        if kind == tar::EntryType::Regular {
            written += 1;
        }
    }
    Ok(written)
}

/// Gzip the first `byte_len` bytes of `src` into `dest`.
pub fn gzip_prefix(src: &Path, byte_len: u64, dest: &Path) -> Result<()> {
    let file = File::open(src)?;
    let mut reader = io::BufReader::new(file).take(byte_len);
    let out = File::create(dest)?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

/// Inflate a gzip file into `dest`, returning the decompressed length.
pub fn gunzip_to(src: &Path, dest: &Path) -> Result<u64> {
    let file = File::open(src)?;
    let mut decoder = GzDecoder::new(file);
    let mut out = File::create(dest)?;
    let n = io::copy(&mut decoder, &mut out)?;
    out.flush()?;
    Ok(n)
}

fn archive_err(action: &str, path: &Path, e: &io::Error) -> Error {
    Error::Archive(format!("{} {}: {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pack_and_extract_round_trip() {
        let td = TempDir::new().unwrap();
        let root = td.path().join("proj");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("a.txt"), "hi").unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn f() {}").unwrap();

        let archive = td.path().join("files.tar.gz");
        pack_files(
            &root,
            &["a.txt".to_string(), "src/lib.rs".to_string()],
            &archive,
        )
        .unwrap();

        let out = td.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let written = extract_archive(&archive, &out).unwrap();
        assert_eq!(written, 2);
        assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "hi");
        assert_eq!(
            fs::read_to_string(out.join("src/lib.rs")).unwrap(),
            "pub fn f() {}"
        );
    }

    #[test]
    fn pack_refuses_symlinks() {
        let td = TempDir::new().unwrap();
        let root = td.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("real.txt"), "x").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();
            let archive = td.path().join("files.tar.gz");
            let err = pack_files(&root, &["link.txt".to_string()], &archive).unwrap_err();
            assert!(matches!(err, Error::Archive(_)));
        }
    }

    #[test]
    fn gzip_prefix_keeps_only_requested_bytes() {
        let td = TempDir::new().unwrap();
        let src = td.path().join("t.jsonl");
        fs::write(&src, b"line one\nline two\n").unwrap();

        let gz = td.path().join("t.jsonl.gz");
        gzip_prefix(&src, 9, &gz).unwrap();

        let out = td.path().join("restored.jsonl");
        let n = gunzip_to(&gz, &out).unwrap();
        assert_eq!(n, 9);
        assert_eq!(fs::read(out).unwrap(), b"line one\n");
    }
}
