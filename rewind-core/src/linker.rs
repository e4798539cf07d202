//! Context Linker
//!
//! Persists the mapping `checkpoint name → chat context` in
//! `conversation/metadata.json`. The whole mapping is rewritten through a
//! temp-then-rename, so readers never observe a partial document. Overlapping
//! hook processes serialize on the rename; each keys a distinct checkpoint
//! name, so a late writer clobbering an earlier view loses nothing it needed.

use crate::error::Result;
use crate::layout::{read_json_opt, write_json_atomic, StorageLayout};
use crate::types::CheckpointContext;
use std::collections::BTreeMap;

pub struct ContextLinker<'a> {
    layout: &'a StorageLayout,
}

impl<'a> ContextLinker<'a> {
    pub fn new(layout: &'a StorageLayout) -> Self {
        Self { layout }
    }

    fn load(&self) -> Result<BTreeMap<String, CheckpointContext>> {
        Ok(read_json_opt(&self.layout.metadata_path())?.unwrap_or_default())
    }

    fn save(&self, map: &BTreeMap<String, CheckpointContext>) -> Result<()> {
        write_json_atomic(&self.layout.metadata_path(), map)
    }

    pub fn add(&self, checkpoint: &str, context: CheckpointContext) -> Result<()> {
        let mut map = self.load()?;
        map.insert(checkpoint.to_string(), context);
        self.save(&map)
    }

    pub fn get(&self, checkpoint: &str) -> Result<Option<CheckpointContext>> {
        Ok(self.load()?.remove(checkpoint))
    }

    pub fn remove(&self, checkpoint: &str) -> Result<bool> {
        let mut map = self.load()?;
        let existed = map.remove(checkpoint).is_some();
        if existed {
            self.save(&map)?;
        }
        Ok(existed)
    }

    pub fn list(&self) -> Result<Vec<(String, CheckpointContext)>> {
        Ok(self.load()?.into_iter().collect())
    }

    /// Drop every record whose checkpoint no longer exists.
    ///
    /// Returns the names removed.
    pub fn sweep<'n>(
        &self,
        valid_checkpoints: impl IntoIterator<Item = &'n str>,
    ) -> Result<Vec<String>> {
        let valid: std::collections::HashSet<&str> = valid_checkpoints.into_iter().collect();
        let mut map = self.load()?;
        let doomed: Vec<String> = map
            .keys()
            .filter(|name| !valid.contains(name.as_str()))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }
        for name in &doomed {
            map.remove(name);
        }
        self.save(&map)?;
        Ok(doomed)
    }
}
