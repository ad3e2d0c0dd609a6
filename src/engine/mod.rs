// src/engine/mod.rs

//! Workflow execution.
//!
//! - [`state`] is the synchronous core: ready queue, status map, pruning.
//! - [`runner`] is the async shell around it: bounded worker pool,
//!   checkpoint writes, stop handling.
//! - [`outcome`] and [`stats`] describe what a run produced.

use serde::{Deserialize, Serialize};

/// Lifecycle of a task within one invocation.
///
/// `Pending -> Ready -> Running -> {Succeeded | Failed}`; a task whose
/// dependency failed goes `Pending -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

pub mod outcome;
pub mod runner;
pub mod state;
pub mod stats;

pub use outcome::{RunOutcome, TaskFailure};
pub use runner::{RunOptions, StopHandle, WorkflowRunner};
pub use state::RunState;
pub use stats::{RunStats, TaskTiming, format_duration};
