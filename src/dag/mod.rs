// src/dag/mod.rs

//! Workflow graph construction and validation.
//!
//! - [`task`] defines task bodies, their run context and registration data.
//! - [`graph`] is the mutable [`DependencyGraph`] builder with validation.
//! - [`plan`] holds the frozen, read-only [`RunPlan`] handed to the engine.

pub mod graph;
pub mod plan;
pub mod task;

pub use graph::DependencyGraph;
pub use plan::RunPlan;
pub use task::{TaskBody, TaskContext, TaskNode, TaskResult};

use crate::engine::WorkflowRunner;
use crate::errors::WorkflowValidationError;

impl DependencyGraph {
    /// Freeze the graph and build a runner in one step.
    pub fn generate_run_workflow(
        self,
        max_workers: usize,
    ) -> Result<WorkflowRunner, WorkflowValidationError> {
        self.freeze()?.generate_run_workflow(max_workers)
    }
}
