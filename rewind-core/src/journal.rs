//! Audit journals: `code/changelog.json` and `restore-history.json`
//!
//! Both are whole-document JSON arrays rewritten atomically on every append.
//! They explain after the fact why a checkpoint exists or disappeared, and
//! what every coordinator run decided.

use crate::error::Result;
use crate::layout::{read_json_opt, write_json_atomic, StorageLayout};
use crate::types::RestoreMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangelogEvent {
    Created,
    Pruned,
    Restored,
}

/// One line of the checkpoint store's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    pub at: DateTime<Utc>,
    pub event: ChangelogEvent,
    pub checkpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One coordinator run, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRecord {
    pub at: DateTime<Utc>,
    pub mode: RestoreMode,
    pub selector: String,
    pub checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency: Option<String>,
    pub dry_run: bool,
    pub outcome: String,
}

pub fn append_changelog(layout: &StorageLayout, entry: ChangelogEntry) -> Result<()> {
    let path = layout.changelog_path();
    let mut entries: Vec<ChangelogEntry> = read_json_opt(&path)?.unwrap_or_default();
    entries.push(entry);
    write_json_atomic(&path, &entries)
}

pub fn read_changelog(layout: &StorageLayout) -> Result<Vec<ChangelogEntry>> {
    Ok(read_json_opt(&layout.changelog_path())?.unwrap_or_default())
}

pub fn append_restore_record(layout: &StorageLayout, record: RestoreRecord) -> Result<()> {
    let path = layout.restore_history_path();
    let mut records: Vec<RestoreRecord> = read_json_opt(&path)?.unwrap_or_default();
    records.push(record);
    write_json_atomic(&path, &records)
}

pub fn read_restore_history(layout: &StorageLayout) -> Result<Vec<RestoreRecord>> {
    Ok(read_json_opt(&layout.restore_history_path())?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorageMode;
    use tempfile::TempDir;

    #[test]
    fn changelog_appends_in_order() {
        let td = TempDir::new().unwrap();
        let layout = StorageLayout::resolve(td.path(), StorageMode::Project).unwrap();

        for name in ["first", "second"] {
            append_changelog(
                &layout,
                ChangelogEntry {
                    at: Utc::now(),
                    event: ChangelogEvent::Created,
                    checkpoint: name.to_string(),
                    detail: None,
                },
            )
            .unwrap();
        }

        let entries = read_changelog(&layout).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].checkpoint, "first");
        assert_eq!(entries[1].checkpoint, "second");
    }
}
