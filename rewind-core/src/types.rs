//! Core domain types for rewind
//!
//! These types model the two halves of a checkpoint — the code snapshot and
//! the transcript cursor — plus the metadata record binding them together.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Checkpoint** | An immutable, named snapshot of a project tree plus an optional transcript cursor |
//! | **Cursor** | A fingerprinted pointer into a transcript file at a message boundary |
//! | **Fork** | A sibling transcript derived from a prefix of the original; never mutates the original |
//! | **Signature** | A deterministic scan hash used only for change detection |
//! | **Emergency snapshot** | A safety checkpoint taken automatically right before a restore |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================
// Agent kinds
// ============================================

/// Host agent CLIs whose sessions can be rewound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Droid,
    /// Fallback label when no detection profile scores above threshold
    Unknown,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Droid => "droid",
            AgentKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(AgentKind::Claude),
            "droid" => Ok(AgentKind::Droid),
            "unknown" => Ok(AgentKind::Unknown),
            _ => Err(format!("unknown agent kind: {}", s)),
        }
    }
}

// ============================================
// File scan
// ============================================

/// One file observed by the scanner.
///
/// `rel_path` is relative to the project root and forward-slash normalized.
/// A failed `stat` yields `size: 0, mtime_ms: 0` rather than aborting the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub path: String,
    pub size: u64,
    #[serde(rename = "mtimeMs")]
    pub mtime_ms: u64,
}

// ============================================
// Transcript cursor
// ============================================

/// Fingerprinted pointer to a message boundary in a transcript file.
///
/// `byte_offset_end` always falls on a record boundary — immediately after the
/// newline terminating the last complete record included in the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptCursor {
    pub path: PathBuf,
    pub byte_offset_end: u64,
    pub prefix_sha256: String,
    pub tail_sha256: String,
    pub last_event_id: Option<String>,
}

/// Transcript subobject embedded in a manifest when chat context was captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSection {
    pub cursor: TranscriptCursor,
    pub session_id: Option<String>,
    pub agent_kind: AgentKind,
}

// ============================================
// Checkpoint manifest
// ============================================

/// Manifest persisted as `manifest.json` inside each snapshot directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(rename = "timestampISO")]
    pub timestamp: DateTime<Utc>,
    pub description: String,
    /// Entry names of the tarball, in scan order
    pub files: Vec<String>,
    #[serde(rename = "fileCount")]
    pub file_count: usize,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    pub signature: String,
    #[serde(rename = "filesMetadata")]
    pub files_metadata: Vec<ScanEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<TranscriptSection>,
}

// ============================================
// Checkpoint metadata record (Context Linker)
// ============================================

/// Chat context bound to a checkpoint, keyed by checkpoint name in
/// `conversation/metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointContext {
    pub agent_kind: AgentKind,
    pub session_id: Option<String>,
    pub transcript_path: PathBuf,
    pub message_identifier: Option<String>,
    /// Zero-based index, in transcript record order, of the last message included
    pub message_index: usize,
    /// Most recent user prompt at capture time
    pub user_prompt: Option<String>,
    #[serde(rename = "capturedAtISO")]
    pub captured_at: DateTime<Utc>,
}

// ============================================
// Storage mode
// ============================================

/// Where snapshot storage lives for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// `<root>/.rewind/`
    #[default]
    Project,
    /// `<HOME>/.rewind/storage/<basename>_<hash12>/`
    Global,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(StorageMode::Project),
            "global" => Ok(StorageMode::Global),
            _ => Err(format!("unknown storage mode: {} (expected project|global)", s)),
        }
    }
}

// ============================================
// Restore modes
// ============================================

/// What a restore touches: the working tree, the conversation, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    Code,
    Context,
    #[default]
    Both,
}

impl std::str::FromStr for RestoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(RestoreMode::Code),
            "context" => Ok(RestoreMode::Context),
            "both" => Ok(RestoreMode::Both),
            _ => Err(format!("unknown restore mode: {} (expected code|context|both)", s)),
        }
    }
}
