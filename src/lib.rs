// src/lib.rs

//! Resumable, resource-bounded workflows of dependent tasks.
//!
//! Register tasks on a [`DependencyGraph`], freeze it into a [`RunPlan`],
//! and execute it with a [`WorkflowRunner`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use workdag::checkpoint::MemoryCheckpointStore;
//! use workdag::{DependencyGraph, Params, TaskBody, TaskNode, Value};
//!
//! # async fn demo() -> workdag::errors::Result<()> {
//! let mut graph = DependencyGraph::new();
//! graph.register(TaskNode::new("extract", TaskBody::blocking(|_| Ok(Value::from(3)))))?;
//! graph.register(
//!     TaskNode::new("report", TaskBody::blocking(|ctx| {
//!         Ok(Value::from(format!("rows: {}", ctx.upstream("extract").cloned().unwrap_or_default())))
//!     }))
//!     .depends_on(["extract"]),
//! )?;
//!
//! let runner = graph
//!     .generate_run_workflow(2)?
//!     .with_store(Arc::new(MemoryCheckpointStore::new()));
//! let outcome = runner.run(Params::new()).await?;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod monitor;
pub mod params;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

pub use dag::{DependencyGraph, RunPlan, TaskBody, TaskContext, TaskNode, TaskResult};
pub use engine::{RunOptions, RunOutcome, StopHandle, TaskFailure, TaskStatus, WorkflowRunner};
pub use errors::{
    ParameterValidationError, ResourceExhaustedError, WorkdagError, WorkflowValidationError,
};
pub use monitor::ResourceLimits;
pub use params::{ParameterSpec, WorkflowParams};
pub use types::{Params, TaskName, Value, ValueType};

use crate::checkpoint::{FileCheckpointStore, run_identity};
use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::format_duration;
use crate::exec::command_graph;
use crate::monitor::ResourceMonitor;

/// High-level entry point used by `main.rs`.
///
/// Loads and validates the workflow file, then either prints the plan
/// (`--dry-run`) or runs it with Ctrl-C wired to a run-level stop. Returns
/// whether every task succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading workflow file {}", args.config.display()))?;

    let params: Params = args.params.into_iter().collect();
    let max_workers = match args.max_workers {
        Some(n) => usize::try_from(n).context("--max-workers is too large")?,
        None => cfg.engine.max_workers,
    };

    let plan = command_graph(&cfg)?.freeze()?;

    if args.dry_run {
        print_dry_run(&cfg, &plan, &params, max_workers)?;
        return Ok(true);
    }

    let mut options = cfg.engine.run_options();
    if args.fresh {
        options.resume = false;
    }

    let runner = plan
        .generate_run_workflow(max_workers)?
        .with_store(Arc::new(FileCheckpointStore::new(&cfg.engine.checkpoint_dir)))
        .with_monitor(ResourceMonitor::with_settings(cfg.engine.monitor_settings()))
        .with_options(options);

    // Ctrl-C -> stop dispatching; in-flight tasks are abandoned and retried
    // on the next invocation.
    {
        let stop = runner.stop_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            warn!("interrupt received; stopping workflow");
            stop.stop();
        });
    }

    info!(
        config = %args.config.display(),
        checkpoint_dir = %cfg.engine.checkpoint_dir.display(),
        "running workflow"
    );
    let outcome = runner.run(params).await?;
    print_summary(&outcome);

    Ok(outcome.is_success())
}

/// Print tasks layer by layer, with their commands, limits and parameters.
fn print_dry_run(cfg: &ConfigFile, plan: &RunPlan, params: &Params, max_workers: usize) -> Result<()> {
    println!("workdag dry-run");
    println!("  engine.max_workers = {max_workers}");
    println!("  engine.checkpoint_dir = {}", cfg.engine.checkpoint_dir.display());
    println!("  engine.resume = {}", cfg.engine.resume);
    println!("  run_id = {}", run_identity(plan, params)?);
    println!();

    for (depth, layer) in plan.layers().iter().enumerate() {
        println!("layer {depth}:");
        for name in layer {
            let Some(task) = cfg.task.get(name) else {
                continue;
            };
            println!("  - {name}");
            println!("      cmd: {}", task.cmd);
            if !task.after.is_empty() {
                println!("      after: {:?}", task.after);
            }
            let limits = task.limits();
            if !limits.is_unbounded() {
                println!("      limits: {limits:?}");
            }
            for (param, spec) in &task.params {
                let kind = spec
                    .expected_type
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "any".to_string());
                let mut line = format!("      param {param}: {kind}");
                if spec.required {
                    line.push_str(", required");
                }
                if let Some(default) = &spec.default {
                    line.push_str(&format!(", default = {default}"));
                }
                println!("{line}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_summary(outcome: &RunOutcome) {
    println!("workdag run {} ({})", outcome.run_id, outcome.execution_id);
    for (name, status) in &outcome.statuses {
        let detail = match status {
            TaskStatus::Succeeded => {
                let source = if outcome.restored.iter().any(|t| t == name) {
                    " [checkpoint]"
                } else {
                    ""
                };
                let result = outcome
                    .results
                    .get(name)
                    .map(ToString::to_string)
                    .unwrap_or_default();
                format!("{}{source}", shorten(&result, 60))
            }
            TaskStatus::Failed => outcome
                .failures
                .get(name)
                .map(ToString::to_string)
                .unwrap_or_default(),
            TaskStatus::Skipped => outcome
                .skipped
                .get(name)
                .map(|cause| format!("upstream '{cause}' failed"))
                .unwrap_or_default(),
            _ => String::new(),
        };
        let timing = outcome
            .stats
            .get(name)
            .map(|t| format!(" in {}", format_duration(t.total)))
            .unwrap_or_default();
        println!("  {name:<24} {status:?}{timing} {detail}");
    }
    if outcome.interrupted {
        println!("interrupted: re-run with the same parameters to resume");
    }
}

fn shorten(s: &str, max: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max {
        s
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}
