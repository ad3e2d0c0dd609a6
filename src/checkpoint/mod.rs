// src/checkpoint/mod.rs

//! Durable per-task progress, keyed by `(run_id, task_name)`.
//!
//! The engine writes one [`CheckpointRecord`] per finished task and reads
//! them all back when a run with the same identity starts again:
//! - `Succeeded` records are reused without running the task
//! - `Failed` records are retried
//!
//! A [`RunManifest`] stored next to the records remembers which graph the
//! records belong to.
//!
//! Backends:
//! - [`file::FileCheckpointStore`]: one JSON file per task, fsync'd before
//!   `record` returns
//! - [`memory::MemoryCheckpointStore`]: process-local, for tests and
//!   throwaway runs

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::RunPlan;
use crate::engine::TaskFailure;
use crate::errors::CheckpointError;
use crate::types::{Params, TaskName, Value};

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Default directory for file-backed checkpoints.
pub const DEFAULT_CHECKPOINT_DIR: &str = "workflow_checkpoints";

/// Terminal status stored for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Succeeded,
    Failed,
}

/// What the store knows about one task of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub task_name: TaskName,
    pub status: CheckpointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn succeeded(task: impl Into<TaskName>, result: Value) -> Self {
        Self {
            task_name: task.into(),
            status: CheckpointStatus::Succeeded,
            result: Some(result),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(task: impl Into<TaskName>, error: TaskFailure) -> Self {
        Self {
            task_name: task.into(),
            status: CheckpointStatus::Failed,
            result: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CheckpointStatus::Succeeded
    }
}

/// Run-level bookkeeping kept alongside the task records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    /// [`RunPlan::fingerprint`] of the graph the records were produced by.
    pub fingerprint: String,
    pub tasks: Vec<TaskName>,
    pub parameters: Params,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Tasks whose success is recorded, as of the last finished invocation.
    #[serde(default)]
    pub completed: Vec<TaskName>,
    /// Id of the invocation that last touched this run.
    #[serde(default)]
    pub last_execution: String,
}

impl RunManifest {
    pub fn for_plan(run_id: &str, plan: &RunPlan, parameters: &Params, execution_id: &str) -> Self {
        let now = Utc::now();
        let mut tasks: Vec<TaskName> = plan.tasks().map(str::to_string).collect();
        tasks.sort();
        Self {
            run_id: run_id.to_string(),
            fingerprint: plan.fingerprint().to_string(),
            tasks,
            parameters: parameters.clone(),
            created_at: now,
            last_updated: now,
            completed: Vec::new(),
            last_execution: execution_id.to_string(),
        }
    }
}

/// Durable key-value store for task checkpoints.
///
/// Implementations must make `record` durable before returning, and must
/// tolerate concurrent `record` calls for distinct task names of one run.
pub trait CheckpointStore: Send + Sync + fmt::Debug {
    /// Every record stored for `run_id`, keyed by task name.
    fn load(&self, run_id: &str) -> Result<BTreeMap<TaskName, CheckpointRecord>, CheckpointError>;

    /// Store (or replace) the record for `task`.
    fn record(
        &self,
        run_id: &str,
        task: &str,
        record: &CheckpointRecord,
    ) -> Result<(), CheckpointError>;

    fn exists(&self, run_id: &str, task: &str) -> Result<bool, CheckpointError>;

    /// Drop everything stored for `run_id`.
    fn clear(&self, run_id: &str) -> Result<(), CheckpointError>;

    fn load_manifest(&self, run_id: &str) -> Result<Option<RunManifest>, CheckpointError>;

    fn save_manifest(&self, run_id: &str, manifest: &RunManifest) -> Result<(), CheckpointError>;
}

/// Deterministic identity of "this graph with these parameters".
///
/// Hash of the sorted task-name set plus the JSON form of the parameter
/// mapping (keys are sorted, so equal mappings hash equally).
pub fn run_identity(plan: &RunPlan, params: &Params) -> Result<String, CheckpointError> {
    let mut names: Vec<&str> = plan.tasks().collect();
    names.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tasks:");
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"params:");
    hasher.update(&serde_json::to_vec(params)?);

    let hex = hasher.finalize().to_hex();
    Ok(hex[..32].to_string())
}
