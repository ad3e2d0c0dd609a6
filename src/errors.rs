// src/errors.rs

//! Crate-wide error types.
//!
//! Graph problems, parameter problems, resource breaches and checkpoint
//! failures each have their own structured type so callers can match on
//! them; [`WorkdagError`] ties them together.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::TaskName;

#[derive(Error, Debug)]
pub enum WorkdagError {
    #[error(transparent)]
    Validation(#[from] WorkflowValidationError),

    #[error("parameter validation failed for task '{task}': {source}")]
    Parameter {
        task: TaskName,
        #[source]
        source: ParameterValidationError,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkdagError>;

/// Graph-level problems. Always surfaced before any task runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowValidationError {
    #[error("task '{0}' is already registered")]
    DuplicateTask(TaskName),

    #[error("task names must not be empty")]
    EmptyTaskName,

    #[error("missing dependencies:\n{}", format_missing(.0))]
    UnknownDependencies(BTreeMap<TaskName, Vec<TaskName>>),

    #[error("circular dependency detected: {}", .0.join(" -> "))]
    Cycle(Vec<TaskName>),

    #[error("max_workers must be at least 1 (got {0})")]
    InvalidWorkerCount(usize),

    #[error("run {run_id} was checkpointed against a different workflow graph: {detail}")]
    PlanMismatch { run_id: String, detail: String },
}

fn format_missing(missing: &BTreeMap<TaskName, Vec<TaskName>>) -> String {
    missing
        .iter()
        .map(|(task, deps)| format!("- {task} requires: {}", deps.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A parameter mapping did not satisfy a task's declared specs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValidationError {
    #[error("missing required parameter '{parameter}'")]
    Missing { parameter: String },

    #[error("parameter '{parameter}' must be of type {expected}, got {actual}")]
    TypeMismatch {
        parameter: String,
        expected: String,
        actual: String,
    },
}

/// Which resource ceiling a task ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Memory,
    Cpu,
    Timeout,
}

impl LimitKind {
    fn unit(self) -> &'static str {
        match self {
            LimitKind::Memory => "MB",
            LimitKind::Cpu => "%",
            LimitKind::Timeout => "s",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::Memory => f.write_str("memory"),
            LimitKind::Cpu => f.write_str("CPU"),
            LimitKind::Timeout => f.write_str("timeout"),
        }
    }
}

/// A task breached one of its configured limits and was cancelled.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error(
    "task '{task}' exceeded {limit} limit. Limit: {limit_value:.1}{unit}, observed: {observed:.1}{unit}",
    unit = .limit.unit()
)]
pub struct ResourceExhaustedError {
    pub task: TaskName,
    pub limit: LimitKind,
    pub limit_value: f64,
    pub observed: f64,
}

/// The checkpoint store could not durably read or write state.
///
/// Fatal to the whole run: without durable records resume is unsound.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt checkpoint {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

impl CheckpointError {
    pub fn io(path: impl fmt::Display, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.to_string(),
            source,
        }
    }
}
