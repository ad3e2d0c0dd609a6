// tests/engine_runs.rs

use std::sync::Arc;
use std::time::Duration;

use workdag::checkpoint::{CheckpointStatus, CheckpointStore, MemoryCheckpointStore};
use workdag::dag::{DependencyGraph, TaskBody, TaskNode};
use workdag::engine::{RunOptions, TaskFailure, TaskStatus};
use workdag::errors::{LimitKind, ParameterValidationError, WorkdagError};
use workdag::monitor::{MonitorSettings, ResourceMonitor};
use workdag::params::{ParameterSpec, WorkflowParams};
use workdag::types::{Params, Value, ValueType};
use workdag_test_utils::builders::graph_of;
use workdag_test_utils::probe::ScriptedProbe;
use workdag_test_utils::recording::Recorder;
use workdag_test_utils::{init_tracing, with_timeout};

fn memory_store() -> Arc<MemoryCheckpointStore> {
    Arc::new(MemoryCheckpointStore::new())
}

#[tokio::test]
async fn independent_tasks_share_the_worker_pool() {
    init_tracing();
    let recorder = Recorder::new();
    let graph = graph_of(&[("A", &[]), ("B", &["A"]), ("C", &["A"])], |_| {
        recorder.echo(Duration::from_millis(150))
    });

    let runner = graph.generate_run_workflow(2).unwrap().with_store(memory_store());
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(recorder.started()[0], "A");
    assert_eq!(recorder.max_concurrency(), 2, "B and C should overlap");
    for task in ["A", "B", "C"] {
        assert_eq!(outcome.result(task), Some(&Value::from(task)));
    }
}

#[tokio::test]
async fn single_worker_never_overlaps() {
    init_tracing();
    let recorder = Recorder::new();
    let graph = graph_of(&[("A", &[]), ("B", &[]), ("C", &[]), ("D", &["A", "B", "C"])], |_| {
        recorder.echo(Duration::from_millis(20))
    });

    let runner = graph.generate_run_workflow(1).unwrap().with_store(memory_store());
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(recorder.max_concurrency(), 1);
    assert_eq!(recorder.finished().last().map(String::as_str), Some("D"));
}

#[tokio::test]
async fn failure_skips_dependents_but_keeps_other_branches() {
    init_tracing();
    let recorder = Recorder::new();
    let graph = graph_of(
        &[("A", &[]), ("B", &["A"]), ("C", &["B"]), ("side", &[])],
        |name| match name {
            "A" => recorder.failing("boom"),
            _ => recorder.echo(Duration::from_millis(5)),
        },
    );

    let runner = graph.generate_run_workflow(2).unwrap().with_store(memory_store());
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    assert!(!outcome.is_success());
    assert_eq!(outcome.status("A"), Some(TaskStatus::Failed));
    assert_eq!(outcome.status("B"), Some(TaskStatus::Skipped));
    assert_eq!(outcome.status("C"), Some(TaskStatus::Skipped));
    assert_eq!(outcome.status("side"), Some(TaskStatus::Succeeded));
    assert_eq!(outcome.skipped.get("C").map(String::as_str), Some("A"));
    assert!(outcome.result("B").is_none());
    assert_eq!(outcome.result("side"), Some(&Value::from("side")));
    assert_eq!(recorder.runs_of("B"), 0);
    assert_eq!(recorder.runs_of("C"), 0);

    match outcome.failures.get("A") {
        Some(TaskFailure::Error(msg)) => assert!(msg.contains("boom")),
        other => panic!("expected body error for A, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_body_is_a_task_failure() {
    init_tracing();
    let mut graph = DependencyGraph::new();
    graph
        .register(TaskNode::new(
            "explode",
            TaskBody::blocking(|_| panic!("kaboom")),
        ))
        .unwrap();
    graph
        .register(TaskNode::new("after", TaskBody::blocking(|_| Ok(Value::Null))).depends_on(["explode"]))
        .unwrap();

    let runner = graph.generate_run_workflow(1).unwrap().with_store(memory_store());
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    match outcome.failures.get("explode") {
        Some(TaskFailure::Panicked(msg)) => assert!(msg.contains("kaboom")),
        other => panic!("expected panic failure, got {other:?}"),
    }
    assert_eq!(outcome.status("after"), Some(TaskStatus::Skipped));
}

#[tokio::test]
async fn missing_required_parameter_fails_before_anything_runs() {
    init_tracing();
    let recorder = Recorder::new();
    let mut graph = DependencyGraph::new();
    graph
        .register(TaskNode::new("first", recorder.echo(Duration::ZERO)))
        .unwrap();
    graph
        .register(
            TaskNode::new("needs_date", recorder.echo(Duration::ZERO))
                .depends_on(["first"])
                .with_params(
                    WorkflowParams::new().param("date", ParameterSpec::required(ValueType::String)),
                ),
        )
        .unwrap();

    let runner = graph.generate_run_workflow(2).unwrap().with_store(memory_store());
    let err = with_timeout(runner.run(Params::new())).await.unwrap_err();

    match err {
        WorkdagError::Parameter { task, source } => {
            assert_eq!(task, "needs_date");
            assert!(source.to_string().contains("date"));
        }
        other => panic!("expected parameter error, got {other:?}"),
    }
    assert!(recorder.started().is_empty());
}

#[tokio::test]
async fn defaults_reach_the_task_body() {
    init_tracing();
    let mut graph = DependencyGraph::new();
    graph
        .register(
            TaskNode::new(
                "greet",
                TaskBody::blocking(|ctx| {
                    let retries = ctx.param("retries").and_then(Value::as_i64).unwrap_or(-1);
                    let who = ctx.param("who").and_then(Value::as_str).unwrap_or("nobody");
                    Ok(Value::from(format!("{who}:{retries}")))
                }),
            )
            .with_params(
                WorkflowParams::new()
                    .param("retries", ParameterSpec::with_default(ValueType::Integer, 3))
                    .param("who", ParameterSpec::required(ValueType::String)),
            ),
        )
        .unwrap();

    let runner = graph.generate_run_workflow(1).unwrap().with_store(memory_store());
    let params: Params = [("who".to_string(), Value::from("ops"))].into_iter().collect();
    let outcome = with_timeout(runner.run(params)).await.unwrap();

    assert_eq!(outcome.result("greet"), Some(&Value::from("ops:3")));
}

#[tokio::test]
async fn timeout_fails_only_the_slow_task() {
    init_tracing();
    let recorder = Recorder::new();
    let mut graph = DependencyGraph::new();
    graph
        .register(
            TaskNode::new("slow", recorder.echo(Duration::from_secs(30)))
                .timeout(Duration::from_millis(100)),
        )
        .unwrap();
    graph
        .register(TaskNode::new("quick", recorder.echo(Duration::ZERO)))
        .unwrap();

    let runner = graph.generate_run_workflow(2).unwrap().with_store(memory_store());
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    match outcome.failures.get("slow") {
        Some(TaskFailure::Resource(breach)) => {
            assert_eq!(breach.limit, LimitKind::Timeout);
            assert_eq!(breach.task, "slow");
        }
        other => panic!("expected timeout breach, got {other:?}"),
    }
    assert_eq!(outcome.status("quick"), Some(TaskStatus::Succeeded));
}

#[tokio::test]
async fn memory_breach_cancels_the_task() {
    init_tracing();
    let recorder = Recorder::new();
    let mut graph = DependencyGraph::new();
    graph
        .register(
            TaskNode::new("hungry", recorder.echo(Duration::from_secs(30))).memory_limit_mb(100.0),
        )
        .unwrap();

    let monitor = ResourceMonitor::new(
        Arc::new(ScriptedProbe::constant(512.0, 1.0)),
        MonitorSettings {
            sample_interval: Duration::from_millis(10),
            cpu_sustain_samples: 1,
        },
    );
    let runner = graph
        .generate_run_workflow(1)
        .unwrap()
        .with_store(memory_store())
        .with_monitor(monitor);
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    match outcome.failures.get("hungry") {
        Some(TaskFailure::Resource(breach)) => {
            assert_eq!(breach.limit, LimitKind::Memory);
            assert!(breach.observed > breach.limit_value);
        }
        other => panic!("expected memory breach, got {other:?}"),
    }
    assert!(recorder.finished().is_empty());
}

#[tokio::test]
async fn stats_cover_every_executed_task() {
    init_tracing();
    let recorder = Recorder::new();
    let graph = graph_of(&[("A", &[]), ("B", &["A"])], |_| recorder.echo(Duration::from_millis(10)));

    let runner = graph.generate_run_workflow(1).unwrap().with_store(memory_store());
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    assert_eq!(outcome.executed.len(), 2);
    for task in ["A", "B"] {
        let timing = outcome.stats.get(task).expect("timing recorded");
        assert_eq!(timing.count, 1);
        assert!(timing.total >= Duration::from_millis(10));
    }
}

#[tokio::test]
async fn parameter_error_fails_only_its_branch_when_checked_lazily() {
    init_tracing();
    let recorder = Recorder::new();
    let mut graph = DependencyGraph::new();
    graph.register(TaskNode::new("a", recorder.echo(Duration::ZERO))).unwrap();
    graph
        .register(
            TaskNode::new("b", recorder.echo(Duration::ZERO))
                .depends_on(["a"])
                .with_params(
                    WorkflowParams::new().param("date", ParameterSpec::required(ValueType::String)),
                ),
        )
        .unwrap();
    graph
        .register(TaskNode::new("c", recorder.echo(Duration::ZERO)).depends_on(["b"]))
        .unwrap();

    let store = memory_store();
    let runner = graph
        .generate_run_workflow(2)
        .unwrap()
        .with_store(store.clone())
        .with_options(RunOptions {
            validate_params_upfront: false,
            ..RunOptions::default()
        });
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    assert_eq!(outcome.status("a"), Some(TaskStatus::Succeeded));
    assert_eq!(outcome.status("b"), Some(TaskStatus::Failed));
    assert_eq!(outcome.status("c"), Some(TaskStatus::Skipped));
    assert_eq!(outcome.skipped.get("c").map(String::as_str), Some("b"));
    assert_eq!(
        outcome.failures.get("b"),
        Some(&TaskFailure::Parameter(ParameterValidationError::Missing {
            parameter: "date".to_string()
        }))
    );
    assert_eq!(recorder.started(), vec!["a"]);

    let records = store.load(&outcome.run_id).unwrap();
    let b = records.get("b").expect("failure recorded for b");
    assert_eq!(b.status, CheckpointStatus::Failed);
    assert!(!records.contains_key("c"));
}

#[tokio::test]
async fn unrepresentable_timeout_does_not_fail_the_task() {
    init_tracing();
    let recorder = Recorder::new();
    let mut graph = DependencyGraph::new();
    graph
        .register(TaskNode::new("a", recorder.echo(Duration::from_millis(5))).timeout(Duration::MAX))
        .unwrap();

    let runner = graph.generate_run_workflow(1).unwrap().with_store(memory_store());
    let outcome = with_timeout(runner.run(Params::new())).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.result("a"), Some(&Value::from("a")));
}
