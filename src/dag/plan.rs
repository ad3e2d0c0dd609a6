// src/dag/plan.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::dag::task::TaskNode;
use crate::engine::WorkflowRunner;
use crate::errors::WorkflowValidationError;
use crate::types::TaskName;

/// Validated, immutable workflow graph.
///
/// Produced by [`crate::dag::DependencyGraph::freeze`] and shared read-only
/// with every worker of a run.
#[derive(Debug)]
pub struct RunPlan {
    /// Tasks in registration order.
    nodes: Vec<TaskNode>,
    index: HashMap<TaskName, usize>,
    /// Direct dependents: tasks that list this one as a dependency.
    dependents: HashMap<TaskName, Vec<TaskName>>,
    layers: Vec<Vec<TaskName>>,
    fingerprint: String,
}

impl RunPlan {
    /// Assumes `nodes` is acyclic with every dependency resolved.
    pub(crate) fn new(nodes: Vec<TaskNode>, layers: Vec<Vec<TaskName>>) -> Self {
        let index: HashMap<TaskName, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();

        let mut dependents: HashMap<TaskName, Vec<TaskName>> = HashMap::new();
        for node in &nodes {
            dependents.entry(node.name.clone()).or_default();
            for dep in &node.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.name.clone());
            }
        }

        let fingerprint = fingerprint(&nodes);

        Self {
            nodes,
            index,
            dependents,
            layers,
            fingerprint,
        }
    }

    /// Task names in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    pub fn task(&self, name: &str) -> Option<&TaskNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, name: &str) -> &[TaskName] {
        self.task(name)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, name: &str) -> &[TaskName] {
        self.dependents
            .get(name)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Topological layers; layer 0 holds the tasks without dependencies.
    pub fn layers(&self) -> &[Vec<TaskName>] {
        &self.layers
    }

    pub fn roots(&self) -> &[TaskName] {
        self.layers.first().map(|l| l.as_slice()).unwrap_or(&[])
    }

    /// Stable hash of the graph's shape (task names and their edges).
    ///
    /// Stored with checkpoints so a resumed run can detect that the graph
    /// changed underneath it.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Build a runner executing this plan with at most `max_workers`
    /// concurrent tasks.
    pub fn generate_run_workflow(
        self,
        max_workers: usize,
    ) -> Result<WorkflowRunner, WorkflowValidationError> {
        WorkflowRunner::new(Arc::new(self), max_workers)
    }
}

fn fingerprint(nodes: &[TaskNode]) -> String {
    let mut lines: Vec<String> = nodes
        .iter()
        .map(|n| {
            let mut deps = n.dependencies.clone();
            deps.sort();
            format!("{}<-{}", n.name, deps.join(","))
        })
        .collect();
    lines.sort();

    let mut hasher = blake3::Hasher::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
