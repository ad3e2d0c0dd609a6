// src/engine/runner.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::checkpoint::{
    CheckpointRecord, CheckpointStore, DEFAULT_CHECKPOINT_DIR, FileCheckpointStore, RunManifest,
    run_identity,
};
use crate::dag::{RunPlan, TaskContext};
use crate::engine::outcome::{RunOutcome, TaskFailure};
use crate::engine::state::RunState;
use crate::engine::stats::{RunStats, format_duration};
use crate::errors::{Result, WorkdagError, WorkflowValidationError};
use crate::monitor::{BoundedRun, ResourceMonitor, UsageSummary};
use crate::types::{Params, TaskName};

/// Knobs for a single runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Reuse checkpoints of an earlier invocation with the same identity.
    /// When false the run's checkpoint namespace is cleared first.
    pub resume: bool,
    /// Check every task's parameters before anything runs and fail the
    /// whole call on the first mismatch. When false, a mismatch only fails
    /// the affected task.
    pub validate_params_upfront: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume: true,
            validate_params_upfront: true,
        }
    }
}

/// Requests a run-level stop.
///
/// Tasks that have not started stay `Pending`; in-flight tasks are
/// abandoned without a checkpoint record and run again next time. A stop
/// is sticky: later invocations on the same runner stop immediately.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Executes a [`RunPlan`] with a bounded pool of concurrent tasks.
///
/// Built by [`RunPlan::generate_run_workflow`]. Every completed task is
/// durably checkpointed before its dependents are released, so a later
/// invocation with the same parameters picks up where this one stopped.
pub struct WorkflowRunner {
    plan: Arc<RunPlan>,
    max_workers: usize,
    store: Arc<dyn CheckpointStore>,
    monitor: ResourceMonitor,
    options: RunOptions,
    stop: StopHandle,
}

impl fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("tasks", &self.plan.len())
            .field("max_workers", &self.max_workers)
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl WorkflowRunner {
    /// Checkpoints go to [`DEFAULT_CHECKPOINT_DIR`] unless another store is
    /// supplied with [`WorkflowRunner::with_store`].
    pub fn new(
        plan: Arc<RunPlan>,
        max_workers: usize,
    ) -> std::result::Result<Self, WorkflowValidationError> {
        if max_workers == 0 {
            return Err(WorkflowValidationError::InvalidWorkerCount(max_workers));
        }
        Ok(Self {
            plan,
            max_workers,
            store: Arc::new(FileCheckpointStore::new(DEFAULT_CHECKPOINT_DIR)),
            monitor: ResourceMonitor::default(),
            options: RunOptions::default(),
            stop: StopHandle::new(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The checkpoint namespace `params` maps to.
    pub fn run_id(&self, params: &Params) -> Result<String> {
        Ok(run_identity(&self.plan, params)?)
    }

    /// Run the workflow with `params`.
    ///
    /// Per-task failures do not fail the call: they are reported in the
    /// returned [`RunOutcome`] together with every successful result.
    /// `Err` is reserved for problems that stop the run as a whole: a
    /// parameter mismatch caught up front, a checkpoint namespace built by
    /// a different graph, or a checkpoint store that cannot be written.
    pub async fn run(&self, params: Params) -> Result<RunOutcome> {
        let execution_id = execution_id();
        let run_id = self.run_id(&params)?;
        let span = info_span!("run", run_id = %run_id, execution_id = %execution_id);

        self.run_inner(params, run_id, execution_id)
            .instrument(span)
            .await
            .inspect_err(|err| error!(error = %err, "workflow aborted"))
    }

    async fn run_inner(
        &self,
        params: Params,
        run_id: String,
        execution_id: String,
    ) -> Result<RunOutcome> {
        info!(
            tasks = self.plan.len(),
            max_workers = self.max_workers,
            resume = self.options.resume,
            "starting workflow"
        );

        if self.options.validate_params_upfront {
            self.validate_all(&params)?;
        }

        let (mut manifest, recovered) = self.prepare_store(&run_id, &execution_id, &params)?;
        let mut state = RunState::new(Arc::clone(&self.plan), params, recovered);

        let mut workers: JoinSet<BoundedRun> = JoinSet::new();
        let mut in_flight: HashMap<Id, TaskName> = HashMap::new();
        let mut usage: BTreeMap<TaskName, UsageSummary> = BTreeMap::new();
        let mut stats = RunStats::new();
        let mut interrupted = false;

        loop {
            if self.stop.is_stopped() {
                interrupted = true;
                break;
            }

            while workers.len() < self.max_workers {
                let Some(task) = state.next_ready() else {
                    break;
                };
                self.dispatch(&run_id, &mut state, task, &mut workers, &mut in_flight)?;
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some(joined) = workers.join_next_with_id() => {
                    let Some((task, run)) = take_completion(joined, &mut in_flight) else {
                        continue;
                    };
                    stats.record(&task, run.usage.wall_time);
                    usage.insert(task.clone(), run.usage);
                    self.settle(&run_id, &mut state, &task, run)?;
                }

                _ = self.stop.stopped() => {
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            workers.shutdown().await;
            for (_, task) in in_flight.drain() {
                warn!(task = %task, "abandoning in-flight task; it will run again on resume");
                state.abandon(&task);
            }
            warn!(running_abandoned = true, "workflow stopped before completion");
        }

        let outcome = state.into_outcome(run_id, execution_id, usage, stats, interrupted);

        manifest.last_updated = Utc::now();
        manifest.completed = outcome.results.keys().cloned().collect();
        self.store.save_manifest(&outcome.run_id, &manifest)?;

        outcome.stats.log_summary();
        info!(
            success = outcome.is_success(),
            succeeded = outcome.results.len(),
            executed = outcome.executed.len(),
            restored = outcome.restored.len(),
            failed = outcome.failures.len(),
            skipped = outcome.skipped.len(),
            interrupted = outcome.interrupted,
            "workflow finished"
        );

        Ok(outcome)
    }

    fn validate_all(&self, params: &Params) -> Result<()> {
        for node in self.plan.nodes() {
            node.params()
                .validate(params)
                .map_err(|source| WorkdagError::Parameter {
                    task: node.name().to_string(),
                    source,
                })?;
        }
        debug!("parameters valid for every task");
        Ok(())
    }

    /// Reset (for fresh runs), check the manifest against this plan and
    /// recover previous records.
    fn prepare_store(
        &self,
        run_id: &str,
        execution_id: &str,
        params: &Params,
    ) -> Result<(RunManifest, BTreeMap<TaskName, CheckpointRecord>)> {
        if !self.options.resume {
            info!("fresh run requested; clearing previous checkpoints");
            self.store.clear(run_id)?;
        }

        let manifest = match self.store.load_manifest(run_id)? {
            Some(existing) if existing.fingerprint != self.plan.fingerprint() => {
                return Err(WorkflowValidationError::PlanMismatch {
                    run_id: run_id.to_string(),
                    detail: "dependency structure differs from the checkpointed run".to_string(),
                }
                .into());
            }
            Some(existing) => RunManifest {
                last_updated: Utc::now(),
                last_execution: execution_id.to_string(),
                ..existing
            },
            None => RunManifest::for_plan(run_id, &self.plan, params, execution_id),
        };

        let recovered = self.store.load(run_id)?;
        if let Some(unknown) = recovered.keys().find(|t| !self.plan.contains(t)) {
            return Err(WorkflowValidationError::PlanMismatch {
                run_id: run_id.to_string(),
                detail: format!("checkpoint exists for unknown task '{unknown}'"),
            }
            .into());
        }

        self.store.save_manifest(run_id, &manifest)?;

        if !recovered.is_empty() {
            let reusable = recovered.values().filter(|r| r.is_success()).count();
            info!(
                records = recovered.len(),
                reusable,
                "resuming from checkpoints"
            );
        }

        Ok((manifest, recovered))
    }

    /// Start `task`, or settle it on the spot when no worker is needed.
    fn dispatch(
        &self,
        run_id: &str,
        state: &mut RunState,
        task: TaskName,
        workers: &mut JoinSet<BoundedRun>,
        in_flight: &mut HashMap<Id, TaskName>,
    ) -> Result<()> {
        let Some(node) = self.plan.task(&task) else {
            warn!(task = %task, "ready task missing from the plan");
            return Ok(());
        };

        // Restored tasks are checked too.
        let resolved = match node.params().validate(state.params()) {
            Ok(resolved) => resolved,
            Err(err) => {
                return self.settle_failure(run_id, state, &task, TaskFailure::Parameter(err));
            }
        };

        if let Some(value) = state.checkpointed_result(&task).cloned() {
            info!(task = %task, "reusing checkpointed result");
            state.restore(&task, value);
            return Ok(());
        }

        let ctx = TaskContext::new(
            task.clone(),
            resolved,
            state.upstream_results(&task),
            self.stop.child_token(),
        );
        state.mark_running(&task);
        info!(task = %task, limits = ?node.limits(), "starting task");

        let monitor = self.monitor.clone();
        let body = node.body().clone();
        let limits = *node.limits();
        let handle = workers.spawn(async move { monitor.run_bounded(&body, ctx, &limits).await });
        in_flight.insert(handle.id(), task);
        Ok(())
    }

    /// Record the result durably, then release or prune dependents.
    fn settle(&self, run_id: &str, state: &mut RunState, task: &str, run: BoundedRun) -> Result<()> {
        match run.result {
            Ok(value) => {
                self.store
                    .record(run_id, task, &CheckpointRecord::succeeded(task, value.clone()))?;
                info!(
                    task = %task,
                    wall = %format_duration(run.usage.wall_time),
                    "task succeeded"
                );
                let ready = state.complete_success(task, value);
                if !ready.is_empty() {
                    debug!(task = %task, ?ready, "dependents released");
                }
                Ok(())
            }
            Err(failure) => self.settle_failure(run_id, state, task, failure),
        }
    }

    fn settle_failure(
        &self,
        run_id: &str,
        state: &mut RunState,
        task: &str,
        failure: TaskFailure,
    ) -> Result<()> {
        self.store
            .record(run_id, task, &CheckpointRecord::failed(task, failure.clone()))?;
        warn!(task = %task, kind = failure.kind(), error = %failure, "task failed");

        for skipped in state.complete_failure(task, failure) {
            warn!(task = %skipped, cause = %task, "skipping task: upstream failed");
        }
        Ok(())
    }
}

/// Map a joined worker back to its task name.
fn take_completion(
    joined: std::result::Result<(Id, BoundedRun), JoinError>,
    in_flight: &mut HashMap<Id, TaskName>,
) -> Option<(TaskName, BoundedRun)> {
    match joined {
        Ok((id, run)) => in_flight.remove(&id).map(|task| (task, run)),
        Err(err) => {
            let task = in_flight.remove(&err.id())?;
            let failure = if err.is_panic() {
                TaskFailure::Panicked("task supervisor panicked".to_string())
            } else {
                TaskFailure::Error("task supervisor was cancelled".to_string())
            };
            Some((
                task,
                BoundedRun {
                    result: Err(failure),
                    usage: UsageSummary::default(),
                },
            ))
        }
    }
}

fn execution_id() -> String {
    format!(
        "run_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        std::process::id()
    )
}
