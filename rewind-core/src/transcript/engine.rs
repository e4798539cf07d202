//! Transcript fork and in-place truncation
//!
//! Fork derives a sibling session file from a prefix of the original and
//! never mutates the live transcript. In-place truncation replaces the
//! original with a prefix of itself, guarded by a timestamped backup and an
//! atomic temp-then-rename swap.

use crate::error::{Error, Result};
use crate::snapshot::{archive, timestamp_token};
use crate::transcript::parser::{hash_file_range, TranscriptParser, FINGERPRINT_SPAN};
use crate::transcript::profile::AgentProfile;
use crate::types::TranscriptCursor;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Where to cut the transcript.
#[derive(Debug, Clone)]
pub enum RewindTarget {
    /// Keep everything up to and including the record with this identifier
    Identifier(String),
    /// Keep everything before the Nth-most-recent user prompt (1-based)
    UserTurnsBack(usize),
}

#[derive(Debug)]
pub struct ForkResult {
    pub path: PathBuf,
    /// Fresh session id, also the fork's file stem
    pub session_id: String,
    pub used_fast_path: bool,
}

#[derive(Debug)]
pub struct TruncateResult {
    pub backup_path: PathBuf,
    pub boundary: u64,
}

pub struct TranscriptEngine<'p> {
    profile: &'p AgentProfile,
}

impl<'p> TranscriptEngine<'p> {
    pub fn new(profile: &'p AgentProfile) -> Self {
        Self { profile }
    }

    /// Byte offset of the cut for a rewind target.
    ///
    /// Identifier cuts are inclusive (offset just past the record); user-turn
    /// cuts are exclusive (offset of the start of that prompt's line).
    pub fn resolve_boundary(&self, transcript: &Path, target: &RewindTarget) -> Result<u64> {
        let parser = TranscriptParser::new(self.profile);
        let messages = parser.parse_file(transcript)?;

        match target {
            RewindTarget::Identifier(id) => messages
                .iter()
                .find(|m| m.identifier.as_deref() == Some(id))
                .map(|m| m.end_offset)
                .ok_or_else(|| Error::TargetNotFound(format!("message {:?}", id))),
            RewindTarget::UserTurnsBack(n) => {
                if *n == 0 {
                    return Err(Error::TargetNotFound(
                        "user turns back must be at least 1".to_string(),
                    ));
                }
                messages
                    .iter()
                    .rev()
                    .filter(|m| m.is_user_prompt)
                    .nth(n - 1)
                    .map(|m| m.offset)
                    .ok_or_else(|| {
                        Error::TargetNotFound(format!("{} user turns back", n))
                    })
            }
        }
    }

    /// Fork the transcript at a checkpoint cursor.
    ///
    /// Fast path: when the live prefix still matches the cursor fingerprint,
    /// copy `[0, byteOffsetEnd)`. Otherwise fall back to inflating the
    /// checkpoint's compressed transcript. The live file is never modified.
    pub fn fork_from_cursor(
        &self,
        cursor: &TranscriptCursor,
        snapshot_gz: Option<&Path>,
    ) -> Result<ForkResult> {
        let live = &cursor.path;
        let (fork_path, session_id) = self.fork_target(live)?;

        match self.fast_path_ok(cursor) {
            Ok(()) => {
                copy_prefix(live, cursor.byte_offset_end, &fork_path)?;
                self.finish_fork(&fork_path)?;
                Ok(ForkResult {
                    path: fork_path,
                    session_id,
                    used_fast_path: true,
                })
            }
            Err(reason) => {
                tracing::info!(%reason, "Fast-path fork rejected; inflating snapshot");
                let Some(gz) = snapshot_gz else {
                    return Err(Error::TranscriptInconsistent(format!(
                        "{} and checkpoint has no transcript snapshot",
                        reason
                    )));
                };
                archive::gunzip_to(gz, &fork_path)?;
                self.finish_fork(&fork_path)?;
                Ok(ForkResult {
                    path: fork_path,
                    session_id,
                    used_fast_path: false,
                })
            }
        }
    }

    /// Fork the live transcript at a raw byte boundary (used by turn-based
    /// rewinds, where the boundary comes from the live file itself).
    pub fn fork_at_boundary(&self, transcript: &Path, boundary: u64) -> Result<ForkResult> {
        verify_newline_boundary(transcript, boundary)?;
        let (fork_path, session_id) = self.fork_target(transcript)?;
        copy_prefix(transcript, boundary, &fork_path)?;
        self.finish_fork(&fork_path)?;
        Ok(ForkResult {
            path: fork_path,
            session_id,
            used_fast_path: true,
        })
    }

    /// Truncate the live transcript in place.
    ///
    /// The timestamped backup is created before anything else; the truncated
    /// content lands via temp-file-then-rename and the backup is never
    /// modified.
    pub fn truncate_in_place(
        &self,
        transcript: &Path,
        target: &RewindTarget,
    ) -> Result<TruncateResult> {
        let boundary = self.resolve_boundary(transcript, target)?;

        let backup_path = transcript.with_file_name(format!(
            "{}.backup.{}",
            transcript
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "transcript.jsonl".to_string()),
            timestamp_token()
        ));
        fs::copy(transcript, &backup_path)?;

        let tmp = crate::layout::temp_sibling(transcript);
        copy_prefix(transcript, boundary, &tmp)?;
        fs::rename(&tmp, transcript)?;

        tracing::info!(
            transcript = %transcript.display(),
            boundary,
            backup = %backup_path.display(),
            "Transcript truncated in place"
        );
        Ok(TruncateResult {
            backup_path,
            boundary,
        })
    }

    fn fork_target(&self, live: &Path) -> Result<(PathBuf, String)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = live.parent().ok_or_else(|| {
            Error::Transcript(format!("transcript has no parent directory: {}", live.display()))
        })?;
        Ok((dir.join(format!("{}.jsonl", session_id)), session_id))
    }

    /// All fast-path preconditions, described on failure.
    fn fast_path_ok(&self, cursor: &TranscriptCursor) -> std::result::Result<(), String> {
        let end = cursor.byte_offset_end;
        if end == 0 {
            return Err("cursor points at an empty prefix".to_string());
        }
        let len = fs::metadata(&cursor.path)
            .map(|m| m.len())
            .map_err(|e| format!("cannot stat live transcript: {}", e))?;
        if len < end {
            return Err(format!("live transcript shrank below cursor ({} < {})", len, end));
        }

        let prefix_len = end.min(FINGERPRINT_SPAN);
        match hash_file_range(&cursor.path, 0, prefix_len) {
            Ok(h) if h == cursor.prefix_sha256 => {}
            Ok(_) => return Err("prefix fingerprint mismatch".to_string()),
            Err(e) => return Err(format!("cannot hash live transcript: {}", e)),
        }

        match byte_at(&cursor.path, end - 1) {
            Ok(b'\n') => Ok(()),
            Ok(_) => Err("cursor does not fall on a newline".to_string()),
            Err(e) => Err(format!("cannot read boundary byte: {}", e)),
        }
    }

    /// Trailing-newline guarantee plus the profile-guarded title rewrite.
    fn finish_fork(&self, fork_path: &Path) -> Result<()> {
        ensure_trailing_newline(fork_path)?;
        if self.profile.fork_title_prefix {
            prefix_first_record_title(fork_path)?;
        }
        Ok(())
    }
}

/// Copy `[0, len)` of `src` into `dest` via a temp sibling.
fn copy_prefix(src: &Path, len: u64, dest: &Path) -> Result<()> {
    let tmp = crate::layout::temp_sibling(dest);
    let mut reader = io::BufReader::new(File::open(src)?).take(len);
    let mut out = File::create(&tmp)?;
    io::copy(&mut reader, &mut out)?;
    out.flush()?;
    drop(out);
    fs::rename(&tmp, dest)?;
    Ok(())
}

fn verify_newline_boundary(path: &Path, boundary: u64) -> Result<()> {
    if boundary == 0 {
        return Ok(());
    }
    let len = fs::metadata(path)?.len();
    if boundary > len {
        return Err(Error::Transcript(format!(
            "boundary {} beyond transcript length {}",
            boundary, len
        )));
    }
    match byte_at(path, boundary - 1)? {
        b'\n' => Ok(()),
        _ => Err(Error::Transcript(format!(
            "boundary {} does not fall on a record boundary",
            boundary
        ))),
    }
}

fn byte_at(path: &Path, offset: u64) -> std::io::Result<u8> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn ensure_trailing_newline(path: &Path) -> Result<()> {
    let len = fs::metadata(path)?.len();
    if len == 0 {
        return Ok(());
    }
    if byte_at(path, len - 1)? != b'\n' {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Prefix the first record's `title` with `[Fork] `, leaving every other
/// byte of the file untouched. Records without a string title pass through.
fn prefix_first_record_title(path: &Path) -> Result<()> {
    let data = fs::read(path)?;
    let Some(newline) = data.iter().position(|b| *b == b'\n') else {
        return Ok(());
    };

    let Ok(mut first) = serde_json::from_slice::<serde_json::Value>(&data[..newline]) else {
        return Ok(());
    };
    let Some(title) = first.get("title").and_then(|t| t.as_str()) else {
        return Ok(());
    };
    if title.starts_with("[Fork] ") {
        return Ok(());
    }
    let new_title = format!("[Fork] {}", title);
    first["title"] = serde_json::Value::String(new_title);

    let tmp = crate::layout::temp_sibling(path);
    let mut out = File::create(&tmp)?;
    out.write_all(serde_json::to_string(&first)?.as_bytes())?;
    out.write_all(&data[newline..])?;
    out.flush()?;
    drop(out);
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::profile::AgentProfile;
    use crate::types::AgentKind;
    use tempfile::TempDir;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut out = String::new();
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        fs::write(path, out).unwrap();
    }

    fn claude_engine() -> TranscriptEngine<'static> {
        TranscriptEngine::new(AgentProfile::for_kind(AgentKind::Claude))
    }

    fn cursor_for(path: &Path) -> TranscriptCursor {
        let parser = TranscriptParser::new(AgentProfile::for_kind(AgentKind::Claude));
        parser.capture_cursor(path).unwrap().unwrap()
    }

    const M1: &str = r#"{"uuid":"m1","type":"user","message":"one"}"#;
    const M2: &str = r#"{"uuid":"m2","type":"assistant","message":"two"}"#;
    const M3: &str = r#"{"uuid":"m3","type":"user","message":"three"}"#;
    const M4: &str = r#"{"uuid":"m4","type":"assistant","message":"four"}"#;

    #[test]
    fn fork_fast_path_is_non_destructive() {
        let td = TempDir::new().unwrap();
        let live = td.path().join("session.jsonl");
        write_lines(&live, &[M1, M2]);
        let cursor = cursor_for(&live);

        // Host keeps appending after the checkpoint.
        write_lines(&live, &[M1, M2, M3, M4]);
        let before = fs::read(&live).unwrap();

        let fork = claude_engine().fork_from_cursor(&cursor, None).unwrap();
        assert!(fork.used_fast_path);
        assert_eq!(fs::read(&live).unwrap(), before);

        let expected = format!("{}\n{}\n", M1, M2);
        assert_eq!(fs::read_to_string(&fork.path).unwrap(), expected);
        assert!(fork.path.file_name().unwrap().to_str().unwrap().ends_with(".jsonl"));
    }

    #[test]
    fn fork_falls_back_to_snapshot_on_mismatch() {
        let td = TempDir::new().unwrap();
        let live = td.path().join("session.jsonl");
        write_lines(&live, &[M1, M2]);
        let cursor = cursor_for(&live);

        let gz = td.path().join("transcript.jsonl.gz");
        archive::gzip_prefix(&live, cursor.byte_offset_end, &gz).unwrap();

        // The host rewrote history; the prefix fingerprint no longer holds.
        write_lines(&live, &[M3, M4]);

        let fork = claude_engine()
            .fork_from_cursor(&cursor, Some(&gz))
            .unwrap();
        assert!(!fork.used_fast_path);
        assert_eq!(
            fs::read_to_string(&fork.path).unwrap(),
            format!("{}\n{}\n", M1, M2)
        );
    }

    #[test]
    fn fork_without_snapshot_reports_inconsistency() {
        let td = TempDir::new().unwrap();
        let live = td.path().join("session.jsonl");
        write_lines(&live, &[M1, M2]);
        let cursor = cursor_for(&live);
        write_lines(&live, &[M3]);

        let err = claude_engine().fork_from_cursor(&cursor, None).unwrap_err();
        assert!(matches!(err, Error::TranscriptInconsistent(_)));
    }

    #[test]
    fn truncate_keeps_backup_equal_to_original() {
        let td = TempDir::new().unwrap();
        let live = td.path().join("session.jsonl");
        write_lines(&live, &[M1, M2, M3, M4]);
        let original = fs::read(&live).unwrap();

        let result = claude_engine()
            .truncate_in_place(&live, &RewindTarget::Identifier("m2".to_string()))
            .unwrap();

        assert_eq!(fs::read(&result.backup_path).unwrap(), original);
        let truncated = fs::read(&live).unwrap();
        assert_eq!(truncated, &original[..result.boundary as usize]);
        assert_eq!(
            fs::read_to_string(&live).unwrap(),
            format!("{}\n{}\n", M1, M2)
        );
    }

    #[test]
    fn user_turns_back_cuts_before_the_prompt() {
        let td = TempDir::new().unwrap();
        let live = td.path().join("session.jsonl");
        // User prompts at records m1 and m3.
        write_lines(&live, &[M1, M2, M3, M4]);

        let engine = claude_engine();
        let boundary = engine
            .resolve_boundary(&live, &RewindTarget::UserTurnsBack(1))
            .unwrap();
        // Everything before m3 survives.
        assert_eq!(boundary as usize, M1.len() + 1 + M2.len() + 1);

        let fork = engine.fork_at_boundary(&live, boundary).unwrap();
        assert_eq!(
            fs::read_to_string(&fork.path).unwrap(),
            format!("{}\n{}\n", M1, M2)
        );

        let err = engine
            .resolve_boundary(&live, &RewindTarget::UserTurnsBack(5))
            .unwrap_err();
        assert!(matches!(err, Error::TargetNotFound(_)));
    }

    #[test]
    fn unknown_identifier_is_target_not_found() {
        let td = TempDir::new().unwrap();
        let live = td.path().join("session.jsonl");
        write_lines(&live, &[M1, M2]);
        let before = fs::read(&live).unwrap();

        let err = claude_engine()
            .truncate_in_place(&live, &RewindTarget::Identifier("m999".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::TargetNotFound(_)));
        // Live transcript untouched on failure.
        assert_eq!(fs::read(&live).unwrap(), before);
    }

    #[test]
    fn droid_fork_prefixes_title() {
        let td = TempDir::new().unwrap();
        let live = td.path().join("abc.jsonl");
        let header = r#"{"id":"s1","type":"session","title":"fix login"}"#;
        let m = r#"{"id":"e1","type":"user","message":"hello"}"#;
        write_lines(&live, &[header, m]);

        let parser = TranscriptParser::new(AgentProfile::for_kind(AgentKind::Droid));
        let cursor = parser.capture_cursor(&live).unwrap().unwrap();

        let engine = TranscriptEngine::new(AgentProfile::for_kind(AgentKind::Droid));
        let fork = engine.fork_from_cursor(&cursor, None).unwrap();

        let content = fs::read_to_string(&fork.path).unwrap();
        let first: serde_json::Value =
            serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["title"], "[Fork] fix login");
        // Remaining records byte-identical.
        assert_eq!(content.lines().nth(1).unwrap(), m);
    }
}
