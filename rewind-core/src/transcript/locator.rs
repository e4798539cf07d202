//! Current-session transcript discovery
//!
//! The most-recently-modified `*.jsonl` file in the profile's session scope
//! is taken as the current session transcript. `None` means no session.

use crate::error::Result;
use crate::transcript::profile::AgentProfile;
use std::path::{Path, PathBuf};

/// Locate the current session transcript for a host agent.
pub fn locate_transcript(
    profile: &AgentProfile,
    home: &Path,
    project_root: &Path,
) -> Result<Option<PathBuf>> {
    let Some(dir) = profile.session_dir(home, project_root) else {
        return Ok(None);
    };
    newest_jsonl(&dir)
}

/// Newest `*.jsonl` under `dir` by modification time.
pub fn newest_jsonl(dir: &Path) -> Result<Option<PathBuf>> {
    let pattern = dir.join("*.jsonl");
    let pattern_str = pattern.to_string_lossy();

    let Ok(entries) = glob::glob(&pattern_str) else {
        return Ok(None);
    };

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for path in entries.flatten() {
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, p)| p))
}
