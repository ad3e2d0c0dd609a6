// src/engine/state.rs

//! Per-invocation task state.
//!
//! [`RunState`] is the synchronous core of the executor: it owns the ready
//! queue and the status map and decides which tasks become ready or skipped
//! after each completion. It does no IO and knows nothing about Tokio, so
//! it is unit tested directly.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::checkpoint::CheckpointRecord;
use crate::dag::RunPlan;
use crate::engine::outcome::{RunOutcome, TaskFailure};
use crate::engine::stats::RunStats;
use crate::engine::TaskStatus;
use crate::monitor::UsageSummary;
use crate::types::{Params, TaskName, Value};

#[derive(Debug)]
pub struct RunState {
    plan: Arc<RunPlan>,
    params: Params,
    status: HashMap<TaskName, TaskStatus>,
    /// Dependencies not yet `Succeeded`, per task.
    unmet: HashMap<TaskName, usize>,
    ready: VecDeque<TaskName>,
    /// Successful results recovered from the checkpoint store.
    recovered: BTreeMap<TaskName, Value>,
    results: BTreeMap<TaskName, Value>,
    failures: BTreeMap<TaskName, TaskFailure>,
    skipped: BTreeMap<TaskName, TaskName>,
    executed: Vec<TaskName>,
    restored: Vec<TaskName>,
    running: usize,
}

impl RunState {
    /// Every task starts `Pending`; tasks without dependencies are queued
    /// `Ready` in registration order.
    ///
    /// Only `Succeeded` records are kept from `recovered`: failed ones are
    /// retried.
    pub fn new(
        plan: Arc<RunPlan>,
        params: Params,
        recovered: BTreeMap<TaskName, CheckpointRecord>,
    ) -> Self {
        let mut status = HashMap::with_capacity(plan.len());
        let mut unmet = HashMap::with_capacity(plan.len());
        let mut ready = VecDeque::new();

        for node in plan.nodes() {
            let deps = node.dependencies().len();
            unmet.insert(node.name().to_string(), deps);
            if deps == 0 {
                status.insert(node.name().to_string(), TaskStatus::Ready);
                ready.push_back(node.name().to_string());
            } else {
                status.insert(node.name().to_string(), TaskStatus::Pending);
            }
        }

        let recovered = recovered
            .into_values()
            .filter(CheckpointRecord::is_success)
            .map(|rec| (rec.task_name, rec.result.unwrap_or_default()))
            .collect();

        Self {
            plan,
            params,
            status,
            unmet,
            ready,
            recovered,
            results: BTreeMap::new(),
            failures: BTreeMap::new(),
            skipped: BTreeMap::new(),
            executed: Vec::new(),
            restored: Vec::new(),
            running: 0,
        }
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn status(&self, task: &str) -> Option<TaskStatus> {
        self.status.get(task).copied()
    }

    pub fn next_ready(&mut self) -> Option<TaskName> {
        self.ready.pop_front()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.running == 0
    }

    pub fn all_terminal(&self) -> bool {
        self.status.values().all(|s| s.is_terminal())
    }

    /// A stored successful result for `task`, if a previous invocation
    /// recorded one.
    pub fn checkpointed_result(&self, task: &str) -> Option<&Value> {
        self.recovered.get(task)
    }

    /// Results of the direct dependencies of `task`.
    pub fn upstream_results(&self, task: &str) -> BTreeMap<TaskName, Value> {
        self.plan
            .dependencies_of(task)
            .iter()
            .filter_map(|dep| self.results.get(dep).map(|v| (dep.clone(), v.clone())))
            .collect()
    }

    pub fn mark_running(&mut self, task: &str) {
        if self.set(task, TaskStatus::Running) != Some(TaskStatus::Running) {
            self.running += 1;
        }
        debug!(task = %task, "marked Running");
    }

    /// Serve `task` from its checkpoint. Returns newly ready dependents.
    pub fn restore(&mut self, task: &str, value: Value) -> Vec<TaskName> {
        self.restored.push(task.to_string());
        self.settle_success(task, value)
    }

    /// The body of `task` ran and succeeded. Returns newly ready dependents.
    pub fn complete_success(&mut self, task: &str, value: Value) -> Vec<TaskName> {
        self.executed.push(task.to_string());
        self.settle_success(task, value)
    }

    /// `task` failed. Its whole pending downstream is skipped; returns the
    /// skipped task names.
    pub fn complete_failure(&mut self, task: &str, failure: TaskFailure) -> Vec<TaskName> {
        if self.set(task, TaskStatus::Failed) == Some(TaskStatus::Running) {
            self.running = self.running.saturating_sub(1);
            self.executed.push(task.to_string());
        }
        self.failures.insert(task.to_string(), failure);
        self.skip_dependents_of(task)
    }

    /// An in-flight task was abandoned by a stop request. It goes back to
    /// `Pending` so the next invocation runs it again.
    pub fn abandon(&mut self, task: &str) {
        if self.set(task, TaskStatus::Pending) == Some(TaskStatus::Running) {
            self.running = self.running.saturating_sub(1);
        }
        debug!(task = %task, "abandoned in-flight task");
    }

    pub fn into_outcome(
        mut self,
        run_id: String,
        execution_id: String,
        usage: BTreeMap<TaskName, UsageSummary>,
        stats: RunStats,
        interrupted: bool,
    ) -> RunOutcome {
        // Queued but never started: still safely resumable.
        for task in std::mem::take(&mut self.ready) {
            self.status.insert(task, TaskStatus::Pending);
        }

        RunOutcome {
            run_id,
            execution_id,
            results: self.results,
            statuses: self.status.into_iter().collect(),
            failures: self.failures,
            skipped: self.skipped,
            executed: self.executed,
            restored: self.restored,
            usage,
            stats,
            interrupted,
        }
    }

    fn set(&mut self, task: &str, status: TaskStatus) -> Option<TaskStatus> {
        match self.status.get_mut(task) {
            Some(slot) => Some(std::mem::replace(slot, status)),
            None => {
                warn!(task = %task, "status update for task missing from the plan");
                None
            }
        }
    }

    fn settle_success(&mut self, task: &str, value: Value) -> Vec<TaskName> {
        if self.set(task, TaskStatus::Succeeded) == Some(TaskStatus::Running) {
            self.running = self.running.saturating_sub(1);
        }
        self.results.insert(task.to_string(), value);

        let plan = Arc::clone(&self.plan);
        let mut newly_ready = Vec::new();
        for dependent in plan.dependents_of(task) {
            let Some(remaining) = self.unmet.get_mut(dependent) else {
                continue;
            };
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 && self.status(dependent) == Some(TaskStatus::Pending) {
                self.status.insert(dependent.clone(), TaskStatus::Ready);
                self.ready.push_back(dependent.clone());
                debug!(task = %dependent, after = %task, "dependencies satisfied; marked Ready");
                newly_ready.push(dependent.clone());
            }
        }
        newly_ready
    }

    fn skip_dependents_of(&mut self, failed: &str) -> Vec<TaskName> {
        let plan = Arc::clone(&self.plan);
        let mut stack: Vec<&TaskName> = plan.dependents_of(failed).iter().collect();
        let mut newly_skipped = Vec::new();

        while let Some(name) = stack.pop() {
            if self.status(name) != Some(TaskStatus::Pending) {
                continue;
            }
            self.status.insert(name.clone(), TaskStatus::Skipped);
            self.skipped.insert(name.clone(), failed.to_string());
            debug!(task = %name, cause = %failed, "marked Skipped due to upstream failure");
            newly_skipped.push(name.clone());
            stack.extend(plan.dependents_of(name));
        }

        newly_skipped
    }
}
