// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::plan::RunPlan;
use crate::dag::task::{TaskBody, TaskNode};
use crate::errors::WorkflowValidationError;
use crate::monitor::ResourceLimits;
use crate::params::WorkflowParams;
use crate::types::TaskName;

/// Mutable builder for a workflow: tasks are registered one by one, then
/// the whole graph is validated and frozen into an immutable [`RunPlan`].
///
/// Dependencies may reference tasks that are registered later; unknown
/// references are only reported by [`DependencyGraph::freeze`].
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Tasks in registration order.
    nodes: Vec<TaskNode>,
    index: HashMap<TaskName, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Fails if the name is empty or already taken.
    pub fn register(&mut self, node: TaskNode) -> Result<(), WorkflowValidationError> {
        if node.name.trim().is_empty() {
            return Err(WorkflowValidationError::EmptyTaskName);
        }
        if self.index.contains_key(&node.name) {
            return Err(WorkflowValidationError::DuplicateTask(node.name));
        }

        debug!(task = %node.name, deps = ?node.dependencies, "registered task");
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Registration in the shape of the classic `add_function` API.
    pub fn add_function<I, S>(
        &mut self,
        name: impl Into<TaskName>,
        body: TaskBody,
        dependencies: I,
        params: WorkflowParams,
        limits: ResourceLimits,
    ) -> Result<(), WorkflowValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        self.register(
            TaskNode::new(name, body)
                .depends_on(dependencies)
                .with_params(params)
                .with_limits(limits),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validate the graph and freeze it into a [`RunPlan`].
    ///
    /// Checks, in order:
    /// - every dependency names a registered task
    /// - there is no cycle (the reported path starts and ends on the same task)
    ///
    /// then partitions the tasks into topological layers.
    pub fn freeze(self) -> Result<RunPlan, WorkflowValidationError> {
        self.check_unknown_dependencies()?;
        self.check_acyclic()?;
        let layers = self.layers();
        Ok(RunPlan::new(self.nodes, layers))
    }

    fn check_unknown_dependencies(&self) -> Result<(), WorkflowValidationError> {
        let mut missing: BTreeMap<TaskName, Vec<TaskName>> = BTreeMap::new();

        for node in &self.nodes {
            for dep in &node.dependencies {
                if !self.index.contains_key(dep) {
                    missing.entry(node.name.clone()).or_default().push(dep.clone());
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(WorkflowValidationError::UnknownDependencies(missing))
        }
    }

    fn check_acyclic(&self) -> Result<(), WorkflowValidationError> {
        // Edge direction: dep -> task.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for node in &self.nodes {
            graph.add_node(node.name.as_str());
        }
        for node in &self.nodes {
            for dep in &node.dependencies {
                graph.add_edge(dep.as_str(), node.name.as_str(), ());
            }
        }

        if toposort(&graph, None).is_ok() {
            return Ok(());
        }

        // Toposort only tells us *that* there is a cycle; walk the graph to
        // report the full path.
        match self.find_cycle() {
            Some(path) => Err(WorkflowValidationError::Cycle(path)),
            None => Err(WorkflowValidationError::Cycle(Vec::new())),
        }
    }

    /// Depth-first search over dependency edges with an in-progress stack.
    ///
    /// Returns the first cycle found, as `[a, b, .., a]` following
    /// dependent -> dependency edges. Iterative, so long chains cannot
    /// exhaust the call stack.
    fn find_cycle(&self) -> Option<Vec<TaskName>> {
        let mut done: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        for root in &self.nodes {
            if done.contains(root.name.as_str()) {
                continue;
            }

            // (task, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root.name.as_str(), 0)];
            on_stack.insert(root.name.as_str());

            while let Some(frame) = stack.last_mut() {
                let (name, next) = *frame;
                let deps = self
                    .index
                    .get(name)
                    .map(|&idx| self.nodes[idx].dependencies.as_slice())
                    .unwrap_or(&[]);

                let Some(dep) = deps.get(next) else {
                    stack.pop();
                    on_stack.remove(name);
                    done.insert(name);
                    continue;
                };
                frame.1 += 1;
                let dep = dep.as_str();

                if on_stack.contains(dep) {
                    let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                    let mut path: Vec<TaskName> =
                        stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                    path.push(dep.to_string());
                    return Some(path);
                }
                if !done.contains(dep) {
                    on_stack.insert(dep);
                    stack.push((dep, 0));
                }
            }
        }
        None
    }

    /// Layer k holds exactly the tasks whose dependencies all sit in layers
    /// < k. Within a layer tasks keep registration order.
    ///
    /// Assumes the graph is acyclic and fully resolved.
    fn layers(&self) -> Vec<Vec<TaskName>> {
        let mut level: HashMap<&str, usize> = HashMap::new();
        let mut remaining: Vec<&TaskNode> = self.nodes.iter().collect();
        let mut current = 0;

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&TaskNode>, Vec<&TaskNode>) =
                remaining.into_iter().partition(|node| {
                    node.dependencies
                        .iter()
                        .all(|dep| level.get(dep.as_str()).is_some_and(|l| *l < current))
                });

            if ready.is_empty() {
                // Unreachable for a validated graph.
                break;
            }

            for node in &ready {
                level.insert(node.name.as_str(), current);
            }
            remaining = blocked;
            current += 1;
        }

        let mut layers: Vec<Vec<TaskName>> = vec![Vec::new(); current];
        for node in &self.nodes {
            if let Some(l) = level.get(node.name.as_str()) {
                layers[*l].push(node.name.clone());
            }
        }
        layers
    }
}
