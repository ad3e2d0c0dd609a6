// src/dag/task.rs

//! Task definitions: the executable body, the context it runs with, and the
//! registration data (dependencies, parameter specs, limits).

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::monitor::ResourceLimits;
use crate::params::WorkflowParams;
use crate::types::{Params, TaskName, Value};

/// What a task body produces.
pub type TaskResult = anyhow::Result<Value>;

type BlockingFn = dyn Fn(&TaskContext) -> TaskResult + Send + Sync;
type AsyncFn = dyn Fn(TaskContext) -> Pin<Box<dyn Future<Output = TaskResult> + Send>> + Send + Sync;

/// The executable part of a task.
///
/// - `Blocking` bodies run on Tokio's blocking pool. They cannot be
///   preempted; on cancellation they are signalled through
///   [`TaskContext::is_cancelled`] and detached.
/// - `Async` bodies run as Tokio tasks and are aborted at their next await
///   point when cancelled.
#[derive(Clone)]
pub enum TaskBody {
    Blocking(Arc<BlockingFn>),
    Async(Arc<AsyncFn>),
}

impl TaskBody {
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(&TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        TaskBody::Blocking(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        TaskBody::Async(Arc::new(
            move |ctx| -> Pin<Box<dyn Future<Output = TaskResult> + Send>> { Box::pin(f(ctx)) },
        ))
    }
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskBody::Blocking(_) => f.write_str("TaskBody::Blocking(..)"),
            TaskBody::Async(_) => f.write_str("TaskBody::Async(..)"),
        }
    }
}

/// Everything a running task can see.
#[derive(Debug, Clone)]
pub struct TaskContext {
    name: TaskName,
    params: Arc<Params>,
    upstream: Arc<BTreeMap<TaskName, Value>>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(
        name: impl Into<TaskName>,
        params: Params,
        upstream: BTreeMap<TaskName, Value>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            params: Arc::new(params),
            upstream: Arc::new(upstream),
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved parameters (declared defaults applied).
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Result of a direct dependency.
    pub fn upstream(&self, task: &str) -> Option<&Value> {
        self.upstream.get(task)
    }

    pub fn upstream_results(&self) -> &BTreeMap<TaskName, Value> {
        &self.upstream
    }

    /// Whether the monitor (or a run-level stop) asked this task to stop.
    /// Long blocking bodies should poll this.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A registered task: name, body, dependencies, parameter specs and limits.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub(crate) name: TaskName,
    pub(crate) body: TaskBody,
    pub(crate) dependencies: Vec<TaskName>,
    pub(crate) params: WorkflowParams,
    pub(crate) limits: ResourceLimits,
}

impl TaskNode {
    pub fn new(name: impl Into<TaskName>, body: TaskBody) -> Self {
        Self {
            name: name.into(),
            body,
            dependencies: Vec::new(),
            params: WorkflowParams::default(),
            limits: ResourceLimits::default(),
        }
    }

    /// Declare dependencies. Order is kept; repeated names are dropped.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    pub fn with_params(mut self, params: WorkflowParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn memory_limit_mb(mut self, mb: f64) -> Self {
        self.limits.memory_mb = Some(mb);
        self
    }

    pub fn cpu_limit_percent(mut self, percent: f64) -> Self {
        self.limits.cpu_percent = Some(percent);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &TaskBody {
        &self.body
    }

    pub fn dependencies(&self) -> &[TaskName] {
        &self.dependencies
    }

    pub fn params(&self) -> &WorkflowParams {
        &self.params
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}
