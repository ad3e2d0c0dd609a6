use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use workdag::checkpoint::{CheckpointRecord, CheckpointStore, MemoryCheckpointStore, RunManifest};
use workdag::errors::CheckpointError;
use workdag::types::TaskName;

/// In-memory store whose writes can be made to fail.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryCheckpointStore,
    fail_records_for: Mutex<HashSet<String>>,
    fail_all_records: Mutex<bool>,
    writes: Mutex<Vec<String>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `record` call for `task`.
    pub fn fail_record_for(self, task: &str) -> Self {
        self.fail_records_for.lock().unwrap().insert(task.to_string());
        self
    }

    /// Fail every `record` call.
    pub fn fail_all_records(self) -> Self {
        *self.fail_all_records.lock().unwrap() = true;
        self
    }

    /// Task names successfully recorded, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl CheckpointStore for FailingStore {
    fn load(&self, run_id: &str) -> Result<BTreeMap<TaskName, CheckpointRecord>, CheckpointError> {
        self.inner.load(run_id)
    }

    fn record(
        &self,
        run_id: &str,
        task: &str,
        record: &CheckpointRecord,
    ) -> Result<(), CheckpointError> {
        if *self.fail_all_records.lock().unwrap()
            || self.fail_records_for.lock().unwrap().contains(task)
        {
            return Err(CheckpointError::Unavailable(format!(
                "injected failure recording '{task}'"
            )));
        }
        self.inner.record(run_id, task, record)?;
        self.writes.lock().unwrap().push(task.to_string());
        Ok(())
    }

    fn exists(&self, run_id: &str, task: &str) -> Result<bool, CheckpointError> {
        self.inner.exists(run_id, task)
    }

    fn clear(&self, run_id: &str) -> Result<(), CheckpointError> {
        self.inner.clear(run_id)
    }

    fn load_manifest(&self, run_id: &str) -> Result<Option<RunManifest>, CheckpointError> {
        self.inner.load_manifest(run_id)
    }

    fn save_manifest(&self, run_id: &str, manifest: &RunManifest) -> Result<(), CheckpointError> {
        self.inner.save_manifest(run_id, manifest)
    }
}
