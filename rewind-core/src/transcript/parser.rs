//! Line-delimited JSON transcript parsing
//!
//! Each non-empty line is one record. The schema is loose: `message` may be a
//! plain string, `message.content` may be a string or a tagged-variant array.
//! Parse failures are logged and skipped for read-only extraction; the engine
//! never rewrites records, so unknown shapes survive untouched.

use crate::error::Result;
use crate::transcript::profile::AgentProfile;
use crate::types::TranscriptCursor;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes covered by each cursor fingerprint.
pub const FINGERPRINT_SPAN: u64 = 64 * 1024;

/// One logical message extracted from a transcript record.
#[derive(Debug, Clone)]
pub struct TranscriptMessage {
    /// Zero-based ordinal among non-empty lines
    pub index: usize,
    /// Byte offset of the start of the record's line
    pub offset: u64,
    /// Byte offset just past the record (past its newline when terminated)
    pub end_offset: u64,
    /// Whether the line ended with a newline
    pub terminated: bool,

    pub identifier: Option<String>,
    pub parent_identifier: Option<String>,
    /// Record `type` (falling back to `role`)
    pub kind: String,
    pub role: Option<String>,
    pub text_content: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: Option<String>,

    /// True for a plain human prompt: a `user` record whose content is text
    /// only (no tool results mixed in)
    pub is_user_prompt: bool,
}

/// Content parts as hosts emit them; only `Text` arms contribute to
/// extracted text.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        #[allow(dead_code)]
        name: String,
    },
    #[serde(other)]
    Other,
}

pub struct TranscriptParser<'p> {
    profile: &'p AgentProfile,
}

impl<'p> TranscriptParser<'p> {
    pub fn new(profile: &'p AgentProfile) -> Self {
        Self { profile }
    }

    /// Stream the transcript into logical messages.
    ///
    /// Empty lines are tolerated (they advance offsets but produce nothing);
    /// malformed lines are logged and skipped.
    pub fn parse_file(&self, path: &Path) -> Result<Vec<TranscriptMessage>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut messages = Vec::new();
        let mut offset = 0u64;
        let mut index = 0usize;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            let terminated = buf.last() == Some(&b'\n');
            let line_start = offset;
            offset += n as u64;

            let text = if terminated { &buf[..n - 1] } else { &buf[..] };
            if text.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            let record_index = index;
            index += 1;

            let value: serde_json::Value = match serde_json::from_slice(text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(offset = line_start, error = %e, "Skipping malformed transcript line");
                    continue;
                }
            };

            messages.push(self.extract(value, record_index, line_start, offset, terminated));
        }

        Ok(messages)
    }

    fn extract(
        &self,
        value: serde_json::Value,
        index: usize,
        offset: u64,
        end_offset: u64,
        terminated: bool,
    ) -> TranscriptMessage {
        let identifier = field_str(&value, &[self.profile.id_field, "uuid", "id"]);
        let parent_identifier =
            field_str(&value, &["parentUuid", "parent_id", "parentId"]);
        let kind = field_str(&value, &["type", "role"]).unwrap_or_else(|| "unknown".to_string());
        let role = value
            .get("message")
            .and_then(|m| m.get("role"))
            .and_then(|r| r.as_str())
            .map(String::from)
            .or_else(|| field_str(&value, &["role"]));
        let timestamp = field_str(&value, &["timestamp"])
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let session_id = field_str(&value, &["sessionId", "session_id"]);

        let (text_content, text_only) = extract_text(&value);
        let is_user_prompt = kind == "user"
            && text_only
            && text_content.as_deref().map(|t| !t.is_empty()).unwrap_or(false);

        TranscriptMessage {
            index,
            offset,
            end_offset,
            terminated,
            identifier,
            parent_identifier,
            kind,
            role,
            text_content,
            timestamp,
            session_id,
            is_user_prompt,
        }
    }

    /// Most recent plain user prompt, scanning from the tail.
    pub fn last_user_prompt<'m>(
        &self,
        messages: &'m [TranscriptMessage],
    ) -> Option<&'m TranscriptMessage> {
        messages.iter().rev().find(|m| m.is_user_prompt)
    }

    /// Capture a cursor at the end of the last complete record.
    ///
    /// Returns `None` when the transcript holds no complete valid record.
    pub fn capture_cursor(&self, path: &Path) -> Result<Option<TranscriptCursor>> {
        let messages = self.parse_file(path)?;
        self.cursor_from_messages(path, &messages)
    }

    /// Cursor assembly for callers that already parsed the transcript.
    pub fn cursor_from_messages(
        &self,
        path: &Path,
        messages: &[TranscriptMessage],
    ) -> Result<Option<TranscriptCursor>> {
        let Some(last) = messages.iter().rev().find(|m| m.terminated) else {
            return Ok(None);
        };

        let end = last.end_offset;
        let prefix_len = end.min(FINGERPRINT_SPAN);
        let tail_start = end.saturating_sub(FINGERPRINT_SPAN);

        Ok(Some(TranscriptCursor {
            path: path.to_path_buf(),
            byte_offset_end: end,
            prefix_sha256: hash_file_range(path, 0, prefix_len)?,
            tail_sha256: hash_file_range(path, tail_start, end)?,
            last_event_id: last.identifier.clone(),
        }))
    }
}

fn field_str(value: &serde_json::Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| value.get(n).and_then(|v| v.as_str()))
        .map(String::from)
}

/// Text extraction per the host schema; the bool reports whether the content
/// was text-only (no tool parts).
fn extract_text(value: &serde_json::Value) -> (Option<String>, bool) {
    let Some(message) = value.get("message") else {
        return (None, false);
    };

    if let Some(s) = message.as_str() {
        return (Some(s.to_string()), true);
    }

    let Some(content) = message.get("content") else {
        return (None, false);
    };
    if let Some(s) = content.as_str() {
        return (Some(s.to_string()), true);
    }

    let Some(items) = content.as_array() else {
        return (None, false);
    };
    let mut texts = Vec::new();
    let mut text_only = true;
    for item in items {
        match serde_json::from_value::<ContentPart>(item.clone()) {
            Ok(ContentPart::Text { text }) => texts.push(text),
            Ok(_) | Err(_) => text_only = false,
        }
    }
    if texts.is_empty() {
        (None, text_only)
    } else {
        (Some(texts.join("\n")), text_only)
    }
}

/// Hex SHA-256 of `[start, end)` of a file.
pub fn hash_file_range(path: &Path, start: u64, end: u64) -> Result<String> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut remaining = end.saturating_sub(start);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}
