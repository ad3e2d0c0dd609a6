// src/exec/command.rs

//! Shell-command task bodies for workflow files.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::dag::{DependencyGraph, TaskBody, TaskContext, TaskNode};
use crate::errors::WorkflowValidationError;
use crate::types::Value;

/// Prefix of the environment variables carrying resolved parameters.
pub const PARAM_ENV_PREFIX: &str = "WORKDAG_PARAM_";
/// Prefix of the environment variables carrying upstream results.
pub const DEP_ENV_PREFIX: &str = "WORKDAG_DEP_";

/// Lines of stderr quoted in the error of a failed command.
const STDERR_TAIL_LINES: usize = 10;

/// Build the dependency graph described by a workflow file.
///
/// Tasks are registered in name order; dependencies come from `after`.
pub fn command_graph(cfg: &ConfigFile) -> Result<DependencyGraph, WorkflowValidationError> {
    let mut graph = DependencyGraph::new();
    for (name, task) in &cfg.task {
        graph.register(
            TaskNode::new(name.clone(), command_body(&task.cmd))
                .depends_on(task.after.iter().cloned())
                .with_params(task.workflow_params())
                .with_limits(task.limits()),
        )?;
    }
    Ok(graph)
}

/// A task body running `cmd` through the platform shell.
pub fn command_body(cmd: &str) -> TaskBody {
    let cmd = cmd.to_string();
    TaskBody::future(move |ctx| {
        let cmd = cmd.clone();
        async move { run_command(&cmd, &ctx).await }
    })
}

/// Run `cmd` for the task described by `ctx`.
///
/// - resolved parameters are exported as `WORKDAG_PARAM_<NAME>`
/// - direct upstream results are exported as `WORKDAG_DEP_<NAME>`
/// - trimmed stdout becomes the task result
/// - a non-zero exit fails the task, quoting the end of stderr
///
/// The child is killed when the task is cancelled or its future dropped.
pub async fn run_command(cmd: &str, ctx: &TaskContext) -> Result<Value> {
    let task = ctx.name();
    info!(task = %task, cmd = %cmd, "starting task process");

    let mut command = shell_command(cmd);
    for (name, value) in ctx.params() {
        command.env(env_key(PARAM_ENV_PREFIX, name), value.to_string());
    }
    for (name, value) in ctx.upstream_results() {
        command.env(env_key(DEP_ENV_PREFIX, name), value.to_string());
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{task}'"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Always drain stderr so the pipe never fills; keep a short tail for
    // error reporting.
    let stderr_task = {
        let task = task.to_string();
        tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            let Some(stderr) = stderr else {
                return tail;
            };
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task, "stderr: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        })
    };

    let read_stdout = async {
        let mut buf = String::new();
        if let Some(mut out) = stdout {
            out.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let (status, output) = tokio::select! {
        res = async { tokio::try_join!(child.wait(), read_stdout) } => {
            res.with_context(|| format!("waiting for process of task '{task}'"))?
        }
        _ = ctx.cancelled() => {
            info!(task = %task, "cancellation requested; killing process");
            if let Err(e) = child.kill().await {
                warn!(task = %task, error = %e, "failed to kill child process on cancellation");
            }
            bail!("task '{task}' was cancelled");
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();
    let code = status.code().unwrap_or(-1);
    info!(
        task = %task,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        if stderr_tail.is_empty() {
            bail!("command exited with status {code}");
        }
        bail!(
            "command exited with status {code}: {}",
            stderr_tail.join("\n")
        );
    }

    Ok(Value::String(output.trim().to_string()))
}

fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

/// `("WORKDAG_PARAM_", "run-date")` -> `WORKDAG_PARAM_RUN_DATE`.
fn env_key(prefix: &str, name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{prefix}{suffix}")
}
