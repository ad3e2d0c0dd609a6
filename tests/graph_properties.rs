// tests/graph_properties.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use proptest::prelude::*;
use workdag::dag::{DependencyGraph, RunPlan, TaskBody};
use workdag::engine::{RunState, RunStats, TaskFailure, TaskStatus};
use workdag::errors::WorkflowValidationError;
use workdag::types::{Params, Value};
use workdag_test_utils::builders::graph_of;

/// Dependency lists for `task_0..task_n`, where task `i` may only depend on
/// tasks `0..i`. With `chain`, every task also depends on its predecessor.
fn dag_strategy(max_tasks: usize, chain: bool) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2..=max_tasks).prop_flat_map(move |n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n).prop_map(
            move |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            return Vec::new();
                        }
                        let mut deps: BTreeSet<usize> = picks.into_iter().map(|p| p % i).collect();
                        if chain {
                            deps.insert(i - 1);
                        }
                        deps.into_iter().collect()
                    })
                    .collect()
            },
        )
    })
}

fn name(i: usize) -> String {
    format!("task_{i}")
}

fn build(deps: &[Vec<usize>]) -> DependencyGraph {
    let names: Vec<String> = (0..deps.len()).map(name).collect();
    let dep_names: Vec<Vec<String>> = deps
        .iter()
        .map(|d| d.iter().map(|&j| name(j)).collect())
        .collect();
    let edges: Vec<(&str, Vec<&str>)> = names
        .iter()
        .zip(&dep_names)
        .map(|(n, d)| (n.as_str(), d.iter().map(String::as_str).collect()))
        .collect();
    let edges: Vec<(&str, &[&str])> = edges.iter().map(|(n, d)| (*n, d.as_slice())).collect();
    graph_of(&edges, |_| TaskBody::blocking(|_| Ok(Value::Null)))
}

fn layer_of(plan: &RunPlan) -> HashMap<String, usize> {
    plan.layers()
        .iter()
        .enumerate()
        .flat_map(|(depth, layer)| layer.iter().map(move |t| (t.clone(), depth)))
        .collect()
}

proptest! {
    #[test]
    fn acyclic_graphs_freeze_into_consistent_layers(deps in dag_strategy(12, false)) {
        let plan = build(&deps).freeze().expect("acyclic graph must freeze");
        let layers = layer_of(&plan);

        prop_assert_eq!(layers.len(), deps.len());
        for (i, task_deps) in deps.iter().enumerate() {
            let own = layers[&name(i)];
            for &d in task_deps {
                prop_assert!(layers[&name(d)] < own, "{} must sit above {}", name(d), name(i));
            }
            if task_deps.is_empty() {
                prop_assert_eq!(own, 0);
            }
        }
    }

    #[test]
    fn back_edge_is_reported_as_a_cycle(deps in dag_strategy(10, true)) {
        let mut deps = deps;
        let last = deps.len() - 1;
        deps[0].push(last);

        match build(&deps).freeze() {
            Err(WorkflowValidationError::Cycle(path)) => {
                prop_assert!(path.len() >= 3);
                prop_assert_eq!(path.first(), path.last());
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn every_dependent_of_a_failure_is_skipped(
        deps in dag_strategy(10, false),
        failing in proptest::collection::btree_set(0..10usize, 0..4),
        picks in proptest::collection::vec(any::<usize>(), 64),
    ) {
        let plan = Arc::new(build(&deps).freeze().expect("acyclic graph must freeze"));
        let mut state = RunState::new(Arc::clone(&plan), Params::new(), BTreeMap::new());
        let failing: BTreeSet<String> = failing.into_iter().filter(|&i| i < deps.len()).map(name).collect();

        // Start everything ready, then finish running tasks in a random order.
        let mut running: Vec<String> = Vec::new();
        let mut picks = picks.into_iter().cycle();
        loop {
            while let Some(task) = state.next_ready() {
                state.mark_running(&task);
                running.push(task);
            }
            if running.is_empty() {
                break;
            }
            let idx = picks.next().unwrap_or(0) % running.len();
            let task = running.swap_remove(idx);
            if failing.contains(&task) {
                state.complete_failure(&task, TaskFailure::Error("injected".to_string()));
            } else {
                state.complete_success(&task, Value::Null);
            }
        }

        prop_assert!(state.all_terminal());
        let outcome = state.into_outcome(
            "run".to_string(),
            "exec".to_string(),
            BTreeMap::new(),
            RunStats::new(),
            false,
        );

        // A task succeeds exactly when neither it nor any ancestor failed.
        let mut tainted: BTreeSet<String> = BTreeSet::new();
        for (i, task_deps) in deps.iter().enumerate() {
            let task = name(i);
            let upstream_failed = task_deps.iter().any(|&d| tainted.contains(&name(d)));
            let status = outcome.status(&task);
            if upstream_failed {
                prop_assert_eq!(status, Some(TaskStatus::Skipped));
                prop_assert!(outcome.result(&task).is_none());
                tainted.insert(task);
            } else if failing.contains(&task) {
                prop_assert_eq!(status, Some(TaskStatus::Failed));
                tainted.insert(task);
            } else {
                prop_assert_eq!(status, Some(TaskStatus::Succeeded));
            }
        }
    }
}
