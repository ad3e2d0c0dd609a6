// src/checkpoint/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{CheckpointRecord, CheckpointStore, RunManifest};
use crate::errors::CheckpointError;
use crate::types::TaskName;

#[derive(Debug, Default)]
struct RunEntry {
    records: BTreeMap<TaskName, CheckpointRecord>,
    manifest: Option<RunManifest>,
}

/// Process-local store. Satisfies the store contract for the lifetime of
/// the process only; use [`super::FileCheckpointStore`] to survive restarts.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> Result<MutexGuard<'_, HashMap<String, RunEntry>>, CheckpointError> {
        self.runs
            .lock()
            .map_err(|_| CheckpointError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, run_id: &str) -> Result<BTreeMap<TaskName, CheckpointRecord>, CheckpointError> {
        Ok(self
            .runs()?
            .get(run_id)
            .map(|entry| entry.records.clone())
            .unwrap_or_default())
    }

    fn record(
        &self,
        run_id: &str,
        task: &str,
        record: &CheckpointRecord,
    ) -> Result<(), CheckpointError> {
        self.runs()?
            .entry(run_id.to_string())
            .or_default()
            .records
            .insert(task.to_string(), record.clone());
        Ok(())
    }

    fn exists(&self, run_id: &str, task: &str) -> Result<bool, CheckpointError> {
        Ok(self
            .runs()?
            .get(run_id)
            .is_some_and(|entry| entry.records.contains_key(task)))
    }

    fn clear(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.runs()?.remove(run_id);
        Ok(())
    }

    fn load_manifest(&self, run_id: &str) -> Result<Option<RunManifest>, CheckpointError> {
        Ok(self
            .runs()?
            .get(run_id)
            .and_then(|entry| entry.manifest.clone()))
    }

    fn save_manifest(&self, run_id: &str, manifest: &RunManifest) -> Result<(), CheckpointError> {
        self.runs()?
            .entry(run_id.to_string())
            .or_default()
            .manifest = Some(manifest.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn runs_are_isolated() {
        let store = MemoryCheckpointStore::new();
        store
            .record("r1", "a", &CheckpointRecord::succeeded("a", Value::Integer(1)))
            .unwrap();

        assert!(store.exists("r1", "a").unwrap());
        assert!(!store.exists("r2", "a").unwrap());
        assert!(store.load("r2").unwrap().is_empty());

        store.clear("r1").unwrap();
        assert!(store.load("r1").unwrap().is_empty());
    }
}
