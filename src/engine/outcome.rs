// src/engine/outcome.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::TaskStatus;
use crate::engine::stats::RunStats;
use crate::errors::{ParameterValidationError, ResourceExhaustedError};
use crate::monitor::UsageSummary;
use crate::types::{TaskName, Value};

/// Why a single task ended up `Failed`.
///
/// Stored verbatim in the task's checkpoint record.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFailure {
    #[error(transparent)]
    Parameter(ParameterValidationError),

    #[error(transparent)]
    Resource(ResourceExhaustedError),

    /// The body returned an error; the full context chain is kept.
    #[error("{0}")]
    Error(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskFailure::Parameter(_) => "parameter",
            TaskFailure::Resource(_) => "resource",
            TaskFailure::Error(_) => "error",
            TaskFailure::Panicked(_) => "panic",
        }
    }
}

/// Everything one invocation of [`crate::engine::WorkflowRunner::run`]
/// produced.
///
/// Results of every task that succeeded are always present, including
/// those served from checkpoints, even when other branches failed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Stable identity shared by every invocation with the same graph and
    /// parameters.
    pub run_id: String,
    /// Per-invocation id, `run_<timestamp>_<pid>`.
    pub execution_id: String,
    pub results: BTreeMap<TaskName, Value>,
    pub statuses: BTreeMap<TaskName, TaskStatus>,
    pub failures: BTreeMap<TaskName, TaskFailure>,
    /// Skipped task -> the failed task that pruned it.
    pub skipped: BTreeMap<TaskName, TaskName>,
    /// Tasks whose body ran during this invocation, in completion order.
    pub executed: Vec<TaskName>,
    /// Tasks whose result came from a checkpoint.
    pub restored: Vec<TaskName>,
    pub usage: BTreeMap<TaskName, UsageSummary>,
    pub stats: RunStats,
    /// A stop request ended the invocation before every task was terminal.
    pub interrupted: bool,
}

impl RunOutcome {
    /// True only when every task of the plan `Succeeded`.
    pub fn is_success(&self) -> bool {
        !self.interrupted
            && self
                .statuses
                .values()
                .all(|s| *s == TaskStatus::Succeeded)
    }

    pub fn status(&self, task: &str) -> Option<TaskStatus> {
        self.statuses.get(task).copied()
    }

    pub fn result(&self, task: &str) -> Option<&Value> {
        self.results.get(task)
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &str> {
        self.failures.keys().map(String::as_str)
    }

    pub fn skipped_tasks(&self) -> impl Iterator<Item = &str> {
        self.skipped.keys().map(String::as_str)
    }

    /// Tasks that never reached a terminal status (only after a stop).
    pub fn pending_tasks(&self) -> impl Iterator<Item = &str> {
        self.statuses
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LimitKind;

    #[test]
    fn failure_round_trips_through_json() {
        let failure = TaskFailure::Resource(ResourceExhaustedError {
            task: "t".to_string(),
            limit: LimitKind::Timeout,
            limit_value: 1.0,
            observed: 1.2,
        });
        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.starts_with("{\"resource\":"));
        let back: TaskFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failure);

        let param = TaskFailure::Parameter(ParameterValidationError::Missing {
            parameter: "date".to_string(),
        });
        assert_eq!(param.to_string(), "missing required parameter 'date'");
        assert_eq!(param.kind(), "parameter");
    }
}
