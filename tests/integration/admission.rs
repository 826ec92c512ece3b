//! Admission control integration tests.
//!
//! Tests that verify platform capacity is checked before every launch and
//! that platform misconfiguration fails before anything runs.

use crate::common::{default_launcher, fast_config, run_graph};
use composer::testing::{Script, ScriptedLauncher};
use composer::{
    AdmissionController, AdmissionError, ComposedTaskRunner, FailureReason, GraphNode, RunnerError,
};
use std::sync::Arc;

#[tokio::test]
async fn test_platform_at_capacity_refuses_launch() {
    let launcher = Arc::new(ScriptedLauncher::new().with_platform("default", 2, 2));
    let admission = AdmissionController::new(launcher.clone());

    assert!(!admission.is_accepting_new_tasks("default").await.unwrap());

    let report = run_graph(&GraphNode::task("ts"), fast_config(), &launcher).await;

    assert!(!report.success());
    assert_eq!(
        report.outcome.reason,
        Some(FailureReason::CapacityExceeded {
            platform: "default".into(),
            maximum: 2,
        })
    );
    assert!(launcher.requests().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_capacity_counts_tasks_launched_by_this_run() {
    let launcher = Arc::new(
        ScriptedLauncher::new()
            .with_platform("default", 1, 0)
            .with_default_script(Script::exit_after(0, 5)),
    );
    let graph = GraphNode::split([
        GraphNode::labelled("x", "work"),
        GraphNode::labelled("y", "work"),
    ]);

    let report = run_graph(&graph, fast_config(), &launcher).await;

    assert!(!report.success());
    let failed = report.outcome.failed_steps();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0].reason,
        Some(FailureReason::CapacityExceeded { .. })
    ));
    assert_eq!(launcher.launched_tasks().await, vec!["work"]);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_is_rechecked_for_each_step() {
    let launcher = Arc::new(default_launcher().with_default_script(Script::exit(0)));
    let graph = GraphNode::sequence([
        GraphNode::task("a"),
        GraphNode::task("b"),
        GraphNode::task("c"),
    ]);

    run_graph(&graph, fast_config(), &launcher).await;

    assert_eq!(launcher.capacity_queries(), 3);
}

#[tokio::test]
async fn test_unknown_platform_fails_at_startup() {
    let launcher = Arc::new(
        ScriptedLauncher::new()
            .with_platform("k8s", 4, 0)
            .with_platform("cf", 4, 0),
    );

    let result = ComposedTaskRunner::new(
        "it",
        &GraphNode::task("ts"),
        fast_config(),
        launcher.clone(),
        launcher.clone(),
    )
    .await;

    match result {
        Err(RunnerError::Admission(AdmissionError::UnknownPlatform { platform, available })) => {
            assert_eq!(platform, "default");
            assert_eq!(available, vec!["k8s".to_string(), "cf".to_string()]);
        }
        Err(other) => panic!("expected UnknownPlatform, got {}", other),
        Ok(_) => panic!("expected construction to fail"),
    }
    assert_eq!(launcher.capacity_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_platform_removed_mid_run_fails_step() {
    let launcher = Arc::new(default_launcher());
    let graph = GraphNode::task("ts");
    let runner = crate::common::build_runner(&graph, fast_config(), &launcher).await;

    launcher.remove_platform("default").await;
    launcher.add_platform("other", 4, 0).await;
    let report = runner.run().await;

    assert!(matches!(
        report.outcome.reason,
        Some(FailureReason::UnknownPlatform { .. })
    ));
    assert!(launcher.requests().await.is_empty());
}
