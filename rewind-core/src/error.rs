//! Error types for rewind-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the rewind-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Refusal to scan a forbidden project root
    #[error("scan refused: {0} is the home directory")]
    ScanRefused(PathBuf),

    /// Emergency snapshot could not be created before a restore
    #[error("safety backup failed: {0}")]
    SafetyBackupFailed(String),

    /// Named checkpoint or message identifier not present
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// Live transcript disagrees with the stored cursor fingerprint
    #[error("transcript inconsistent: {0}")]
    TranscriptInconsistent(String),

    /// Tar pack/unpack failed
    #[error("archive error: {0}")]
    Archive(String),

    /// Transcript could not be read or has no usable records
    #[error("transcript error: {0}")]
    Transcript(String),
}

/// Result type alias for rewind-core
pub type Result<T> = std::result::Result<T, Error>;
