//! Project tree scanner and change-detection signature
//!
//! The scanner walks the project root in preorder, pruning ignored
//! directories before descending and skipping symlinks entirely. The output
//! is sorted lexicographically by relative path, so a fixed tree always
//! produces the same sequence — the property the tree signature relies on.

use crate::error::{Error, Result};
use crate::ignore::IgnoreMatcher;
use crate::types::ScanEntry;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Walks a project tree and produces its deterministic file list.
pub struct FileScanner<'a> {
    root: &'a Path,
    matcher: &'a IgnoreMatcher,
}

impl<'a> FileScanner<'a> {
    pub fn new(root: &'a Path, matcher: &'a IgnoreMatcher) -> Self {
        Self { root, matcher }
    }

    /// Scan the tree. Refuses to run when the root is the home directory.
    pub fn scan(&self) -> Result<Vec<ScanEntry>> {
        if let Some(home) = dirs::home_dir() {
            let home = fs::canonicalize(&home).unwrap_or(home);
            let root = fs::canonicalize(self.root).unwrap_or_else(|_| self.root.to_path_buf());
            if root == home {
                return Err(Error::ScanRefused(root));
            }
        }

        let mut entries = Vec::new();
        self.walk(self.root, "", &mut entries)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn walk(&self, dir: &Path, rel_prefix: &str, out: &mut Vec<ScanEntry>) -> Result<()> {
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                return Ok(());
            }
        };

        for entry in read_dir.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                tracing::warn!(dir = %dir.display(), "Skipping non-UTF-8 entry name");
                continue;
            };
            let rel = if rel_prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", rel_prefix, name)
            };

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            // Symlinks are not followed.
            if file_type.is_symlink() {
                continue;
            }

            if file_type.is_dir() {
                if !self.matcher.ignored(&format!("{}/", rel)) {
                    self.walk(&entry.path(), &rel, out)?;
                }
            } else if file_type.is_file() && !self.matcher.ignored(&rel) {
                out.push(scan_entry(&entry.path(), rel));
            }
        }
        Ok(())
    }
}

/// Stat one file; a failed stat yields `{ size: 0, mtime_ms: 0 }`.
fn scan_entry(path: &Path, rel: String) -> ScanEntry {
    let (size, mtime_ms) = match fs::metadata(path) {
        Ok(md) => {
            let mtime_ms = md
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            (md.len(), mtime_ms)
        }
        Err(_) => (0, 0),
    };
    ScanEntry {
        path: rel,
        size,
        mtime_ms,
    }
}

/// SHA-256 over `(path, size, mtimeMs)` in scan order.
///
/// Used only for change detection, never for integrity.
pub fn tree_signature(entries: &[ScanEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.path.as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.size.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(entry.mtime_ms.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
