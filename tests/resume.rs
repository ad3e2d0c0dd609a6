// tests/resume.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use workdag::checkpoint::{CheckpointStore, FileCheckpointStore};
use workdag::dag::{DependencyGraph, TaskBody, TaskNode};
use workdag::engine::{RunOptions, StopHandle, TaskFailure, TaskStatus};
use workdag::errors::{WorkdagError, WorkflowValidationError};
use workdag::params::{ParameterSpec, WorkflowParams};
use workdag::types::{Params, Value, ValueType};
use workdag_test_utils::builders::graph_of;
use workdag_test_utils::recording::Recorder;
use workdag_test_utils::store::FailingStore;
use workdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn chain(recorder: &Recorder) -> DependencyGraph {
    graph_of(&[("A", &[]), ("B", &["A"]), ("C", &["B"])], |_| {
        recorder.echo(Duration::from_millis(5))
    })
}

fn params(date: &str) -> Params {
    [("date".to_string(), Value::from(date))].into_iter().collect()
}

#[tokio::test]
async fn second_run_restores_everything() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(dir.path()));

    let first = Recorder::new();
    let outcome = with_timeout(
        chain(&first)
            .generate_run_workflow(2)?
            .with_store(store.clone())
            .run(params("2024-12-15")),
    )
    .await?;
    assert!(outcome.is_success());
    assert_eq!(first.started(), vec!["A", "B", "C"]);
    assert!(store.exists(&outcome.run_id, "C")?);

    let second = Recorder::new();
    let again = with_timeout(
        chain(&second)
            .generate_run_workflow(2)?
            .with_store(store.clone())
            .run(params("2024-12-15")),
    )
    .await?;

    assert!(again.is_success());
    assert!(second.started().is_empty());
    assert!(again.executed.is_empty());
    assert_eq!(again.restored, vec!["A", "B", "C"]);
    assert_eq!(again.run_id, outcome.run_id);
    assert_eq!(again.results, outcome.results);
    Ok(())
}

#[tokio::test]
async fn different_parameters_use_a_separate_namespace() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let recorder = Recorder::new();

    for date in ["2024-12-15", "2024-12-16"] {
        let outcome = with_timeout(
            chain(&recorder)
                .generate_run_workflow(1)?
                .with_store(store.clone())
                .run(params(date)),
        )
        .await?;
        assert!(outcome.is_success());
    }

    assert_eq!(recorder.runs_of("A"), 2);
    Ok(())
}

#[tokio::test]
async fn failed_task_is_retried_on_the_next_invocation() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let attempts = Arc::new(AtomicUsize::new(0));

    let build = |attempts: Arc<AtomicUsize>| -> Result<DependencyGraph, WorkflowValidationError> {
        let mut graph = DependencyGraph::new();
        graph.register(TaskNode::new("stable", TaskBody::blocking(|_| Ok(Value::from(1)))))?;
        graph.register(
            TaskNode::new(
                "flaky",
                TaskBody::blocking(move |_| {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("transient outage");
                    }
                    Ok(Value::from("recovered"))
                }),
            )
            .depends_on(["stable"]),
        )?;
        graph.register(
            TaskNode::new(
                "report",
                TaskBody::blocking(|ctx| Ok(ctx.upstream("flaky").cloned().unwrap_or_default())),
            )
            .depends_on(["flaky"]),
        )?;
        Ok(graph)
    };

    let first = with_timeout(
        build(attempts.clone())?
            .generate_run_workflow(2)?
            .with_store(store.clone())
            .run(Params::new()),
    )
    .await?;
    assert_eq!(first.status("flaky"), Some(TaskStatus::Failed));
    assert_eq!(first.status("report"), Some(TaskStatus::Skipped));
    assert_eq!(first.result("stable"), Some(&Value::from(1)));

    let second = with_timeout(
        build(attempts.clone())?
            .generate_run_workflow(2)?
            .with_store(store.clone())
            .run(Params::new()),
    )
    .await?;
    assert!(second.is_success());
    assert_eq!(second.restored, vec!["stable"]);
    assert_eq!(second.executed, vec!["flaky", "report"]);
    assert_eq!(second.result("report"), Some(&Value::from("recovered")));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn stopped_run_resumes_where_it_left_off() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(dir.path()));

    // "load" stops the run from inside its own body and then hangs.
    let stop = StopHandle::new();
    let trigger = stop.clone();
    let mut graph = DependencyGraph::new();
    graph.register(TaskNode::new("extract", TaskBody::blocking(|_| Ok(Value::from(10)))))?;
    graph.register(
        TaskNode::new(
            "load",
            TaskBody::future(move |_| {
                let trigger = trigger.clone();
                async move {
                    trigger.stop();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Value::Null)
                }
            }),
        )
        .depends_on(["extract"]),
    )?;

    let interrupted = with_timeout(
        graph
            .generate_run_workflow(2)?
            .with_store(store.clone())
            .with_stop_handle(stop)
            .run(Params::new()),
    )
    .await?;
    assert!(interrupted.interrupted);
    assert!(!interrupted.is_success());
    assert_eq!(interrupted.status("extract"), Some(TaskStatus::Succeeded));
    assert_eq!(interrupted.status("load"), Some(TaskStatus::Pending));
    assert!(!store.exists(&interrupted.run_id, "load")?);

    let recorder = Recorder::new();
    let graph = graph_of(&[("extract", &[]), ("load", &["extract"])], |name| match name {
        "extract" => TaskBody::blocking(|_| Ok(Value::from(-1))),
        _ => recorder.returning(Duration::ZERO, Value::from("loaded")),
    });
    let resumed = with_timeout(
        graph
            .generate_run_workflow(2)?
            .with_store(store.clone())
            .run(Params::new()),
    )
    .await?;
    assert!(resumed.is_success());
    assert_eq!(resumed.result("extract"), Some(&Value::from(10)));
    assert_eq!(resumed.executed, vec!["load"]);
    assert_eq!(recorder.runs_of("load"), 1);
    Ok(())
}

#[tokio::test]
async fn stop_is_sticky_for_the_same_runner() -> TestResult {
    init_tracing();
    let recorder = Recorder::new();
    let runner = chain(&recorder)
        .generate_run_workflow(1)?
        .with_store(Arc::new(FailingStore::new()));
    runner.stop_handle().stop();

    let outcome = with_timeout(runner.run(Params::new())).await?;
    assert!(outcome.interrupted);
    assert_eq!(outcome.pending_tasks().count(), 3);
    assert!(recorder.started().is_empty());
    Ok(())
}

#[tokio::test]
async fn fresh_run_ignores_existing_checkpoints() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let recorder = Recorder::new();

    for resume in [true, false] {
        let outcome = with_timeout(
            chain(&recorder)
                .generate_run_workflow(1)?
                .with_store(store.clone())
                .with_options(RunOptions {
                    resume,
                    ..RunOptions::default()
                })
                .run(Params::new()),
        )
        .await?;
        assert!(outcome.is_success());
        assert!(outcome.restored.is_empty());
    }

    assert_eq!(recorder.runs_of("A"), 2);
    assert_eq!(recorder.runs_of("C"), 2);
    Ok(())
}

#[tokio::test]
async fn changed_graph_is_rejected_for_an_existing_run() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let recorder = Recorder::new();

    with_timeout(
        chain(&recorder)
            .generate_run_workflow(1)?
            .with_store(store.clone())
            .run(Params::new()),
    )
    .await?;

    // Same task names, different edges.
    let rewired = graph_of(&[("A", &[]), ("B", &[]), ("C", &["A"])], |_| {
        recorder.echo(Duration::ZERO)
    });
    let err = with_timeout(
        rewired
            .generate_run_workflow(1)?
            .with_store(store.clone())
            .run(Params::new()),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(
            err,
            WorkdagError::Validation(WorkflowValidationError::PlanMismatch { .. })
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(recorder.runs_of("A"), 1);
    Ok(())
}

#[tokio::test]
async fn checkpoint_write_failure_aborts_the_run() -> TestResult {
    init_tracing();
    let recorder = Recorder::new();
    let store = Arc::new(FailingStore::new().fail_record_for("B"));

    let err = with_timeout(
        chain(&recorder)
            .generate_run_workflow(1)?
            .with_store(store.clone())
            .run(Params::new()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, WorkdagError::Checkpoint(_)), "unexpected error: {err:?}");
    assert_eq!(store.writes(), vec!["A"]);
    assert_eq!(recorder.runs_of("C"), 0, "dependents must not start without a record");
    Ok(())
}

#[tokio::test]
async fn restored_task_still_has_its_parameters_checked() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let lazy = RunOptions {
        validate_params_upfront: false,
        ..RunOptions::default()
    };

    let recorder = Recorder::new();
    let first = with_timeout(
        chain(&recorder)
            .generate_run_workflow(1)?
            .with_store(store.clone())
            .with_options(lazy)
            .run(Params::new()),
    )
    .await?;
    assert!(first.is_success());

    // Same names and edges, but B now declares a required parameter.
    let mut graph = DependencyGraph::new();
    graph.register(TaskNode::new("A", recorder.echo(Duration::ZERO)))?;
    graph.register(
        TaskNode::new("B", recorder.echo(Duration::ZERO))
            .depends_on(["A"])
            .with_params(WorkflowParams::new().param("date", ParameterSpec::required(ValueType::String))),
    )?;
    graph.register(TaskNode::new("C", recorder.echo(Duration::ZERO)).depends_on(["B"]))?;

    let second = with_timeout(
        graph
            .generate_run_workflow(1)?
            .with_store(store.clone())
            .with_options(lazy)
            .run(Params::new()),
    )
    .await?;

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.restored, vec!["A"]);
    assert_eq!(second.status("B"), Some(TaskStatus::Failed));
    assert!(matches!(second.failures.get("B"), Some(TaskFailure::Parameter(_))));
    assert_eq!(second.status("C"), Some(TaskStatus::Skipped));
    assert_eq!(recorder.runs_of("B"), 1);
    Ok(())
}
