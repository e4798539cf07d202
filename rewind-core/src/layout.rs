//! Persisted state layout and placement
//!
//! Two placements exist, selected by configuration:
//! - *project-local*: `<root>/.rewind/`
//! - *global*: `<HOME>/.rewind/storage/<basename>_<hash12>/`
//!
//! Switching modes does not migrate snapshots; listing under the new mode is
//! simply empty until a new checkpoint is made.

use crate::error::{Error, Result};
use crate::types::StorageMode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name of the project-local store and the global storage root.
pub const STORE_DIR_NAME: &str = ".rewind";

/// Resolved locations of everything the engine persists for one project.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    project_root: PathBuf,
    storage_root: PathBuf,
    mode: StorageMode,
}

impl StorageLayout {
    /// Resolve the layout for a project root.
    ///
    /// The root is canonicalized when possible. The home directory itself is
    /// refused at runtime; everything downstream relies on this.
    pub fn resolve(project_root: &Path, mode: StorageMode) -> Result<Self> {
        let project_root = fs::canonicalize(project_root)
            .unwrap_or_else(|_| project_root.to_path_buf());

        if let Some(home) = dirs::home_dir() {
            let home = fs::canonicalize(&home).unwrap_or(home);
            if project_root == home {
                return Err(Error::ScanRefused(project_root));
            }
        }

        let storage_root = match mode {
            StorageMode::Project => project_root.join(STORE_DIR_NAME),
            StorageMode::Global => {
                let home = dirs::home_dir()
                    .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))?;
                home.join(STORE_DIR_NAME)
                    .join("storage")
                    .join(global_store_name(&project_root))
            }
        };

        Ok(Self {
            project_root,
            storage_root,
            mode,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.storage_root.join("code").join("snapshots")
    }

    pub fn snapshot_dir(&self, name: &str) -> PathBuf {
        self.snapshots_dir().join(name)
    }

    pub fn project_config_path(&self) -> PathBuf {
        self.storage_root.join("code").join("config.json")
    }

    pub fn changelog_path(&self) -> PathBuf {
        self.storage_root.join("code").join("changelog.json")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.storage_root.join("conversation").join("metadata.json")
    }

    pub fn session_state_path(&self) -> PathBuf {
        self.storage_root.join("session.json")
    }

    pub fn restore_history_path(&self) -> PathBuf {
        self.storage_root.join("restore-history.json")
    }

    /// Create the on-disk layout. Idempotent.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.snapshots_dir())?;
        fs::create_dir_all(self.storage_root.join("conversation"))?;
        Ok(())
    }
}

/// `<basename>_<first 12 hex of sha256(absolute_root)>`
fn global_store_name(project_root: &Path) -> String {
    let basename = project_root
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("project");

    let mut hasher = Sha256::new();
    hasher.update(project_root.to_string_lossy().as_bytes());
    let digest = hex::encode(hasher.finalize());

    format!("{}_{}", basename, &digest[..12])
}

/// Serialize to a sibling temp file and rename over the target.
///
/// Readers always see either the old or the new complete document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and deserialize a JSON file, `None` when the file does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Temp path in the same directory as `path`, so the final rename is atomic.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(&format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}
