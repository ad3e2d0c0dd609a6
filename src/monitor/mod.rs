// src/monitor/mod.rs

//! Bounded execution of a single task.
//!
//! [`ResourceMonitor::run_bounded`] runs a task body on its own worker and,
//! concurrently:
//! - samples memory/CPU through a [`UsageProbe`] when a memory or CPU limit
//!   is configured
//! - enforces the wall-clock timeout
//! - cancels the task when any limit is breached
//!
//! Cancellation is best-effort. Async bodies are aborted; blocking bodies
//! only see their cancellation token flip and are detached, so their work
//! may keep running after the task has been reported as failed.

pub mod probe;
pub mod sample;

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::dag::{TaskBody, TaskContext, TaskResult};
use crate::engine::TaskFailure;
use crate::errors::{LimitKind, ResourceExhaustedError};
use crate::types::Value;

pub use probe::{NullProbe, ProbeReading, SysinfoProbe, UsageProbe};
pub use sample::{UsageSample, UsageSummary};

/// Default interval between two usage samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Default number of consecutive over-limit CPU samples before a breach.
pub const DEFAULT_CPU_SUSTAIN_SAMPLES: u32 = 3;

/// Per-task resource ceilings. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub timeout: Option<Duration>,
}

impl ResourceLimits {
    pub fn is_unbounded(&self) -> bool {
        self.memory_mb.is_none() && self.cpu_percent.is_none() && self.timeout.is_none()
    }

    fn needs_sampling(&self) -> bool {
        self.memory_mb.is_some() || self.cpu_percent.is_some()
    }
}

/// Sampling behaviour shared by every task of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub sample_interval: Duration,
    /// A CPU breach needs this many consecutive samples above the limit.
    pub cpu_sustain_samples: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            cpu_sustain_samples: DEFAULT_CPU_SUSTAIN_SAMPLES,
        }
    }
}

/// Outcome of one bounded execution.
#[derive(Debug, Clone)]
pub struct BoundedRun {
    pub result: Result<Value, TaskFailure>,
    pub usage: UsageSummary,
}

/// Runs task bodies under their resource limits.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    probe: Arc<dyn UsageProbe>,
    settings: MonitorSettings,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::with_settings(MonitorSettings::default())
    }
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn UsageProbe>, settings: MonitorSettings) -> Self {
        Self { probe, settings }
    }

    /// Monitor the current process through `sysinfo`.
    pub fn with_settings(settings: MonitorSettings) -> Self {
        let probe: Arc<dyn UsageProbe> = match SysinfoProbe::current_process() {
            Some(p) => Arc::new(p),
            None => {
                warn!("cannot resolve current process id; memory/CPU limits will not be enforced");
                Arc::new(NullProbe)
            }
        };
        Self::new(probe, settings)
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Run `body` with `ctx` under `limits`.
    ///
    /// Never returns early without a result: the body either finishes, or a
    /// limit is breached and the body is cancelled. Dropping the returned
    /// future also cancels the body.
    pub async fn run_bounded(
        &self,
        body: &TaskBody,
        ctx: TaskContext,
        limits: &ResourceLimits,
    ) -> BoundedRun {
        let task = ctx.name().to_string();
        let started = Instant::now();
        let mut worker = Worker::spawn(body, ctx);

        let sampling = limits.needs_sampling();
        let mut ticker = tokio::time::interval(self.settings.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A timeout too large to represent as an instant never fires.
        let deadline = limits
            .timeout
            .and_then(|t| tokio::time::Instant::now().checked_add(t));
        let timeout = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        let mut usage = UsageSummary::default();
        let mut cpu_streak = 0u32;

        debug!(task = %task, ?limits, "starting bounded execution");

        let result = loop {
            tokio::select! {
                biased;

                joined = &mut worker.handle => break join_result(joined),

                _ = &mut timeout => {
                    let limit = limits.timeout.unwrap_or_default();
                    break Err(TaskFailure::Resource(ResourceExhaustedError {
                        task: task.clone(),
                        limit: LimitKind::Timeout,
                        limit_value: limit.as_secs_f64(),
                        observed: started.elapsed().as_secs_f64(),
                    }));
                }

                _ = ticker.tick(), if sampling => {
                    let Some(reading) = self.probe.sample() else {
                        continue;
                    };
                    let sample = UsageSample {
                        memory_mb: reading.memory_mb,
                        cpu_percent: reading.cpu_percent,
                        wall_elapsed: started.elapsed(),
                    };
                    usage.observe(&sample);
                    trace!(
                        task = %task,
                        memory_mb = sample.memory_mb,
                        cpu_percent = sample.cpu_percent,
                        "usage sample"
                    );

                    if let Some(breach) = self.check_limits(&task, limits, &sample, &mut cpu_streak) {
                        break Err(TaskFailure::Resource(breach));
                    }
                }
            }
        };

        if let Err(TaskFailure::Resource(breach)) = &result {
            warn!(
                task = %task,
                limit = %breach.limit,
                limit_value = breach.limit_value,
                observed = breach.observed,
                "resource limit breached; cancelling task"
            );
            worker.cancel();
        }

        usage.wall_time = started.elapsed();
        info!(
            task = %task,
            wall_secs = usage.wall_time.as_secs_f64(),
            samples = usage.samples,
            peak_memory_mb = ?usage.peak_memory_mb,
            peak_cpu_percent = ?usage.peak_cpu_percent,
            "resource usage summary"
        );

        BoundedRun { result, usage }
    }

    fn check_limits(
        &self,
        task: &str,
        limits: &ResourceLimits,
        sample: &UsageSample,
        cpu_streak: &mut u32,
    ) -> Option<ResourceExhaustedError> {
        if let Some(limit) = limits.memory_mb {
            if sample.memory_mb > limit {
                return Some(ResourceExhaustedError {
                    task: task.to_string(),
                    limit: LimitKind::Memory,
                    limit_value: limit,
                    observed: sample.memory_mb,
                });
            }
        }

        if let Some(limit) = limits.cpu_percent {
            if sample.cpu_percent > limit {
                *cpu_streak += 1;
            } else {
                *cpu_streak = 0;
            }
            if *cpu_streak >= self.settings.cpu_sustain_samples.max(1) {
                return Some(ResourceExhaustedError {
                    task: task.to_string(),
                    limit: LimitKind::Cpu,
                    limit_value: limit,
                    observed: sample.cpu_percent,
                });
            }
        }

        None
    }
}

/// The spawned body plus the means to stop it.
///
/// Dropping a `Worker` cancels the body, so abandoning the monitor future
/// (e.g. on a run-level stop) never leaves an async body running.
struct Worker {
    handle: JoinHandle<TaskResult>,
    token: CancellationToken,
}

impl Worker {
    fn spawn(body: &TaskBody, ctx: TaskContext) -> Self {
        let token = ctx.cancellation_token().clone();
        let handle = match body {
            TaskBody::Blocking(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(&ctx))
            }
            TaskBody::Async(f) => tokio::spawn(f(ctx)),
        };
        Self { handle, token }
    }

    fn cancel(&self) {
        self.token.cancel();
        self.handle.abort();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            self.cancel();
        }
    }
}

fn join_result(joined: Result<TaskResult, JoinError>) -> Result<Value, TaskFailure> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::Error(format!("{err:#}"))),
        Err(err) if err.is_panic() => Err(TaskFailure::Panicked(panic_message(err.into_panic()))),
        Err(_) => Err(TaskFailure::Error("task was cancelled".to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
