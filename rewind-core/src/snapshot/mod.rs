//! Checkpoint Store
//!
//! Produces, lists, prunes, and restores tarball snapshots of the project
//! tree. Each snapshot is a directory `code/snapshots/<name>/` holding
//! `manifest.json`, `files.tar.gz`, and optionally `transcript.jsonl.gz`.
//!
//! Ordering inside `create` is conservative: the tarball is finalized before
//! the manifest is written, so a crash mid-snapshot leaves an orphan tarball
//! rather than a manifest claiming nonexistent data.

pub mod archive;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ignore::IgnoreMatcher;
use crate::journal::{self, ChangelogEntry, ChangelogEvent};
use crate::layout::{read_json_opt, write_json_atomic, StorageLayout};
use crate::scan::{tree_signature, FileScanner};
use crate::types::{AgentKind, Manifest, TranscriptCursor, TranscriptSection};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

/// Description reserved for the automatic pre-restore safety snapshot.
pub const EMERGENCY_DESCRIPTION: &str = "rewind backup";

/// Archive file name inside each snapshot directory.
pub const ARCHIVE_FILE: &str = "files.tar.gz";

/// Compressed transcript prefix inside each snapshot directory.
pub const TRANSCRIPT_FILE: &str = "transcript.jsonl.gz";

/// Chat context captured alongside a code snapshot.
#[derive(Debug, Clone)]
pub struct TranscriptAttachment {
    pub cursor: TranscriptCursor,
    pub session_id: Option<String>,
    pub agent_kind: AgentKind,
}

/// Result of `create`.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Manifest),
    /// Working tree signature equals the latest checkpoint; nothing written.
    NoChanges { signature: String },
}

/// What a code restore changed on disk.
#[derive(Debug, Clone)]
pub struct AppliedRestore {
    pub files_restored: usize,
    pub files_deleted: usize,
}

/// Result of a store-driven restore (emergency snapshot + apply).
#[derive(Debug)]
pub struct RestoredCode {
    pub checkpoint: String,
    pub emergency: String,
    pub applied: AppliedRestore,
}

pub struct CheckpointStore<'a> {
    layout: &'a StorageLayout,
    config: &'a Config,
}

impl<'a> CheckpointStore<'a> {
    pub fn new(layout: &'a StorageLayout, config: &'a Config) -> Self {
        Self { layout, config }
    }

    fn matcher(&self) -> IgnoreMatcher {
        IgnoreMatcher::new(&self.config.ignore_patterns, &self.config.force_include)
    }

    /// Scan the working tree and compute its signature.
    pub fn current_signature(&self) -> Result<String> {
        let matcher = self.matcher();
        let entries = FileScanner::new(self.layout.project_root(), &matcher).scan()?;
        Ok(tree_signature(&entries))
    }

    /// Create a checkpoint unless the tree is unchanged since the latest one.
    ///
    /// `name_hint` overrides the slug derived from the description.
    pub fn create(
        &self,
        description: &str,
        force: bool,
        name_hint: Option<&str>,
        transcript: Option<TranscriptAttachment>,
    ) -> Result<CreateOutcome> {
        self.layout.ensure()?;

        let matcher = self.matcher();
        let entries = FileScanner::new(self.layout.project_root(), &matcher).scan()?;
        let signature = tree_signature(&entries);

        if !force {
            if let Some(latest) = self.latest()? {
                if latest.signature == signature {
                    tracing::debug!(latest = %latest.name, "No changes since latest checkpoint");
                    return Ok(CreateOutcome::NoChanges { signature });
                }
            }
        }

        let slug = slugify(name_hint.unwrap_or(description));
        let name = format!("{}_{}", slug, timestamp_token());
        let dir = self.layout.snapshot_dir(&name);
        fs::create_dir_all(&dir)?;

        let build = || -> Result<Manifest> {
            let files: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
            archive::pack_files(self.layout.project_root(), &files, &dir.join(ARCHIVE_FILE))?;

            let transcript_section = match &transcript {
                Some(attachment) => {
                    archive::gzip_prefix(
                        &attachment.cursor.path,
                        attachment.cursor.byte_offset_end,
                        &dir.join(TRANSCRIPT_FILE),
                    )?;
                    Some(TranscriptSection {
                        cursor: attachment.cursor.clone(),
                        session_id: attachment.session_id.clone(),
                        agent_kind: attachment.agent_kind,
                    })
                }
                None => None,
            };

            let manifest = Manifest {
                name: name.clone(),
                timestamp: Utc::now(),
                description: description.to_string(),
                files,
                file_count: entries.len(),
                total_bytes: entries.iter().map(|e| e.size).sum(),
                signature: signature.clone(),
                files_metadata: entries.clone(),
                transcript: transcript_section,
            };
            write_json_atomic(&dir.join("manifest.json"), &manifest)?;
            Ok(manifest)
        };

        let manifest = match build() {
            Ok(m) => m,
            Err(e) => {
                // A half-filled snapshot directory must not shadow real ones.
                let _ = fs::remove_dir_all(&dir);
                return Err(e);
            }
        };

        tracing::info!(name = %manifest.name, files = manifest.file_count, "Checkpoint created");
        let _ = journal::append_changelog(
            self.layout,
            ChangelogEntry {
                at: manifest.timestamp,
                event: ChangelogEvent::Created,
                checkpoint: manifest.name.clone(),
                detail: Some(description.to_string()),
            },
        );

        // Best-effort: a failed prune never fails a create.
        if let Err(e) = self.prune() {
            tracing::warn!(error = %e, "Pruning after create failed");
        }

        Ok(CreateOutcome::Created(manifest))
    }

    /// All readable manifests, newest first. Unreadable ones are skipped.
    pub fn list(&self) -> Result<Vec<Manifest>> {
        let dir = self.layout.snapshots_dir();
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };

        let mut manifests = Vec::new();
        for entry in read_dir.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let manifest_path = entry.path().join("manifest.json");
            match read_json_opt::<Manifest>(&manifest_path) {
                Ok(Some(manifest)) => manifests.push(manifest),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %manifest_path.display(), error = %e, "Skipping unreadable manifest");
                }
            }
        }
        manifests.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(manifests)
    }

    pub fn latest(&self) -> Result<Option<Manifest>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Resolve a checkpoint selector.
    ///
    /// `last` → newest, `prev` → second newest, a positive integer N → Nth
    /// newest (1-based), otherwise exact name, otherwise newest substring
    /// match.
    pub fn resolve(&self, selector: &str) -> Result<Manifest> {
        let manifests = self.list()?;
        let not_found = || Error::TargetNotFound(format!("checkpoint {:?}", selector));

        let index = match selector {
            "last" => Some(0),
            "prev" => Some(1),
            _ => selector
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .map(|n| n - 1),
        };
        if let Some(i) = index {
            return manifests.into_iter().nth(i).ok_or_else(not_found);
        }

        if let Some(exact) = manifests.iter().find(|m| m.name == selector) {
            return Ok(exact.clone());
        }
        manifests
            .into_iter()
            .find(|m| m.name.contains(selector))
            .ok_or_else(not_found)
    }

    /// Take the pre-restore safety snapshot. Always forced.
    pub fn emergency_snapshot(&self) -> Result<String> {
        match self.create(EMERGENCY_DESCRIPTION, true, None, None)? {
            CreateOutcome::Created(manifest) => Ok(manifest.name),
            CreateOutcome::NoChanges { .. } => {
                // Unreachable with force=true; keep the error shape anyway.
                Err(Error::SafetyBackupFailed(
                    "forced snapshot reported no changes".to_string(),
                ))
            }
        }
    }

    /// Apply a restore: delete paths absent from the manifest, then extract.
    ///
    /// The caller is responsible for having taken an emergency snapshot.
    pub fn apply(&self, manifest: &Manifest) -> Result<AppliedRestore> {
        let archive_path = self.layout.snapshot_dir(&manifest.name).join(ARCHIVE_FILE);
        if !archive_path.exists() {
            return Err(Error::Archive(format!(
                "snapshot {} has no tarball",
                manifest.name
            )));
        }

        let matcher = self.matcher();
        let current = FileScanner::new(self.layout.project_root(), &matcher).scan()?;
        let keep: HashSet<&str> = manifest.files.iter().map(String::as_str).collect();

        let mut files_deleted = 0usize;
        for entry in &current {
            if keep.contains(entry.path.as_str()) {
                continue;
            }
            let full = self.layout.project_root().join(&entry.path);
            match fs::remove_file(&full) {
                Ok(()) => {
                    files_deleted += 1;
                    remove_empty_parents(&full, self.layout.project_root());
                }
                Err(e) => {
                    tracing::warn!(path = %full.display(), error = %e, "Could not delete during restore");
                }
            }
        }

        let files_restored = archive::extract_archive(&archive_path, self.layout.project_root())?;

        // Tar headers carry whole-second mtimes; re-applying the recorded
        // millisecond values keeps the tree signature a true round-trip.
        for meta in &manifest.files_metadata {
            if meta.mtime_ms == 0 {
                continue;
            }
            let full = self.layout.project_root().join(&meta.path);
            let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_millis(meta.mtime_ms);
            if let Ok(file) = fs::File::options().write(true).open(&full) {
                let _ = file.set_modified(mtime);
            }
        }

        let _ = journal::append_changelog(
            self.layout,
            ChangelogEntry {
                at: Utc::now(),
                event: ChangelogEvent::Restored,
                checkpoint: manifest.name.clone(),
                detail: None,
            },
        );

        Ok(AppliedRestore {
            files_restored,
            files_deleted,
        })
    }

    /// Resolve, take an emergency snapshot, then apply.
    ///
    /// On extraction failure the error carries the emergency snapshot name so
    /// the caller can recover.
    pub fn restore(&self, selector: &str) -> Result<RestoredCode> {
        let manifest = self.resolve(selector)?;
        let emergency = self
            .emergency_snapshot()
            .map_err(|e| Error::SafetyBackupFailed(e.to_string()))?;

        match self.apply(&manifest) {
            Ok(applied) => Ok(RestoredCode {
                checkpoint: manifest.name,
                emergency,
                applied,
            }),
            Err(e) => Err(Error::Archive(format!(
                "{} (recover with emergency snapshot {})",
                e, emergency
            ))),
        }
    }

    /// `undo` is a restore of the newest checkpoint.
    pub fn undo_last(&self) -> Result<RestoredCode> {
        self.restore("last")
    }

    /// Drop checkpoints beyond the age limit, then beyond the count cap.
    ///
    /// Deletions are best-effort; failures never abort the caller.
    pub fn prune(&self) -> Result<Vec<String>> {
        let manifests = self.list()?;
        let mut doomed: Vec<String> = Vec::new();

        let mut survivors = Vec::new();
        if self.config.max_age_days > 0 {
            let cutoff = Utc::now() - Duration::days(self.config.max_age_days as i64);
            for manifest in manifests {
                if manifest.timestamp < cutoff {
                    doomed.push(manifest.name);
                } else {
                    survivors.push(manifest);
                }
            }
        } else {
            survivors = manifests;
        }

        // survivors are already newest-first.
        for manifest in survivors.into_iter().skip(self.config.max_checkpoints) {
            doomed.push(manifest.name);
        }

        let mut dropped = Vec::new();
        for name in doomed {
            let dir = self.layout.snapshot_dir(&name);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    let _ = journal::append_changelog(
                        self.layout,
                        ChangelogEntry {
                            at: Utc::now(),
                            event: ChangelogEvent::Pruned,
                            checkpoint: name.clone(),
                            detail: None,
                        },
                    );
                    dropped.push(name);
                }
                Err(e) => {
                    tracing::warn!(checkpoint = %name, error = %e, "Pruning deletion failed");
                }
            }
        }
        Ok(dropped)
    }

    /// Path to a checkpoint's compressed transcript prefix, if captured.
    pub fn transcript_snapshot_path(&self, name: &str) -> Option<PathBuf> {
        let path = self.layout.snapshot_dir(name).join(TRANSCRIPT_FILE);
        path.exists().then_some(path)
    }

    /// Integrity pass over every snapshot directory.
    ///
    /// Returns one line per problem: unreadable manifest, missing tarball,
    /// or a manifest whose counts disagree with its own file lists.
    pub fn verify(&self) -> Result<Vec<String>> {
        let mut problems = Vec::new();
        let Ok(read_dir) = fs::read_dir(self.layout.snapshots_dir()) else {
            return Ok(problems);
        };

        for entry in read_dir.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            let manifest_path = entry.path().join("manifest.json");

            let manifest = match read_json_opt::<Manifest>(&manifest_path) {
                Ok(Some(m)) => m,
                Ok(None) => {
                    problems.push(format!("{}: missing manifest.json", dir_name));
                    continue;
                }
                Err(e) => {
                    problems.push(format!("{}: unreadable manifest ({})", dir_name, e));
                    continue;
                }
            };

            if !entry.path().join(ARCHIVE_FILE).exists() {
                problems.push(format!("{}: missing {}", dir_name, ARCHIVE_FILE));
            }
            if manifest.file_count != manifest.files.len()
                || manifest.file_count != manifest.files_metadata.len()
            {
                problems.push(format!(
                    "{}: fileCount {} disagrees with files ({}) / filesMetadata ({})",
                    dir_name,
                    manifest.file_count,
                    manifest.files.len(),
                    manifest.files_metadata.len()
                ));
            }
            if manifest.name != dir_name {
                problems.push(format!(
                    "{}: manifest names itself {}",
                    dir_name, manifest.name
                ));
            }
        }
        Ok(problems)
    }
}

/// Lowercase the description and collapse every non-alphanumeric run to `_`.
/// Empty input falls back to `checkpoint`.
pub fn slugify(description: &str) -> String {
    let mut slug = String::with_capacity(description.len());
    let mut last_was_sep = true;
    for c in description.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() {
        "checkpoint".to_string()
    } else {
        slug
    }
}

/// ISO-8601 timestamp with `:` replaced by `-`, millisecond precision so
/// overlapping creators get distinct names.
pub fn timestamp_token() -> String {
    Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
        .replace(':', "-")
}

/// Remove directories left empty by a deletion, up to (excluding) `root`.
fn remove_empty_parents(deleted: &std::path::Path, root: &std::path::Path) {
    let mut dir = deleted.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}
