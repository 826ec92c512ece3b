//! Shutdown integration tests.
//!
//! Tests that verify a shutdown signal stops new work, and that split
//! branches are either awaited or abandoned depending on configuration.

use crate::common::{build_runner, default_launcher, fast_config, succeeded};
use composer::testing::Script;
use composer::{FailureReason, GraphNode, RunContext, RunId, SplitPoolConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn signal_after(token: &CancellationToken, after: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}

#[tokio::test(start_paused = true)]
async fn test_split_waits_for_branches_when_configured() {
    let launcher = Arc::new(default_launcher().with_default_script(Script::exit_after(0, 10)));
    let graph = GraphNode::sequence([
        GraphNode::split([GraphNode::task("a"), GraphNode::task("b")]),
        GraphNode::task("c"),
    ]);
    let config = fast_config().with_split(
        SplitPoolConfig::default().with_wait_for_tasks_to_complete_on_shutdown(true),
    );
    let runner = build_runner(&graph, config, &launcher).await;
    let shutdown = CancellationToken::new();
    signal_after(&shutdown, Duration::from_millis(25));

    let report = runner
        .run_with(RunContext::new(RunId::new()).with_shutdown(shutdown))
        .await;

    assert!(succeeded(&report, "a_0"));
    assert!(succeeded(&report, "b_0"));
    assert_eq!(
        report.outcome.find("c_0").unwrap().reason,
        Some(FailureReason::ShutdownInProgress)
    );
    assert!(!report.success());
    assert_eq!(launcher.launched_tasks().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_split_abandons_branches_without_waiting() {
    let launcher = Arc::new(default_launcher().with_default_script(Script::NeverCompletes));
    let graph = GraphNode::split([GraphNode::task("a"), GraphNode::task("b")]);
    let runner = build_runner(&graph, fast_config(), &launcher).await;
    let shutdown = CancellationToken::new();
    signal_after(&shutdown, Duration::from_millis(25));

    let report = runner
        .run_with(RunContext::new(RunId::new()).with_shutdown(shutdown))
        .await;

    assert!(!report.success());
    for step in ["a_0", "b_0"] {
        let outcome = report.outcome.find(step).unwrap();
        assert_eq!(outcome.reason, Some(FailureReason::Cancelled));
        // The engine stops waiting but never cancels the external task.
        assert!(launcher.is_running(outcome.execution_id.unwrap()).await);
    }
    assert!(report.duration < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_queued_branches_are_dropped_on_shutdown() {
    let launcher = Arc::new(default_launcher().with_default_script(Script::exit_after(0, 10)));
    let graph = GraphNode::split([
        GraphNode::labelled("first", "work"),
        GraphNode::labelled("second", "work"),
    ]);
    let config = fast_config().with_split(SplitPoolConfig::default().with_core_pool_size(1));
    let runner = build_runner(&graph, config, &launcher).await;
    let shutdown = CancellationToken::new();
    signal_after(&shutdown, Duration::from_millis(25));

    let report = runner
        .run_with(RunContext::new(RunId::new()).with_shutdown(shutdown))
        .await;

    assert_eq!(launcher.launched_tasks().await.len(), 1);
    let reasons: Vec<_> = report
        .outcome
        .children
        .iter()
        .map(|c| c.reason.clone())
        .collect();
    assert!(reasons.contains(&Some(FailureReason::Cancelled)));
    assert!(reasons.contains(&Some(FailureReason::ShutdownInProgress)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_abandons_top_level_step() {
    let launcher = Arc::new(default_launcher().with_default_script(Script::NeverCompletes));
    let runner = build_runner(&GraphNode::task("a"), fast_config(), &launcher).await;
    let cancel = CancellationToken::new();
    signal_after(&cancel, Duration::from_millis(55));

    let report = runner
        .run_with(RunContext::new(RunId::new()).with_cancel(cancel))
        .await;

    assert_eq!(report.outcome.reason, Some(FailureReason::Cancelled));
    assert_eq!(launcher.launched_tasks().await, vec!["a"]);
}

#[tokio::test]
async fn test_shutdown_before_start_launches_nothing() {
    let launcher = Arc::new(default_launcher());
    let graph = GraphNode::sequence([GraphNode::task("a"), GraphNode::task("b")]);
    let runner = build_runner(&graph, fast_config(), &launcher).await;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let report = runner
        .run_with(RunContext::new(RunId::new()).with_shutdown(shutdown))
        .await;

    assert!(!report.success());
    assert!(launcher.requests().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_before_start_skips_single_task() {
    let launcher = Arc::new(default_launcher());
    let runner = build_runner(&GraphNode::task("a"), fast_config(), &launcher).await;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let report = runner
        .run_with(RunContext::new(RunId::new()).with_shutdown(shutdown))
        .await;

    assert_eq!(report.outcome.reason, Some(FailureReason::ShutdownInProgress));
    assert!(launcher.requests().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_does_not_launch_queued_branch() {
    let launcher = Arc::new(default_launcher().with_default_script(Script::NeverCompletes));
    let graph = GraphNode::split([GraphNode::labelled("w1", "w"), GraphNode::labelled("w2", "w")]);
    let config = fast_config().with_split(SplitPoolConfig::default().with_core_pool_size(1));
    let runner = build_runner(&graph, config, &launcher).await;
    let cancel = CancellationToken::new();
    signal_after(&cancel, Duration::from_millis(25));

    let report = runner
        .run_with(RunContext::new(RunId::new()).with_cancel(cancel))
        .await;

    assert_eq!(launcher.launched_tasks().await, vec!["w"]);
    assert!(
        report
            .outcome
            .children
            .iter()
            .all(|c| c.reason == Some(FailureReason::Cancelled))
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_a_run_stops_branch_polling() {
    let launcher = Arc::new(default_launcher().with_default_script(Script::NeverCompletes));
    let graph = GraphNode::split([GraphNode::task("a"), GraphNode::task("b")]);
    let runner = build_runner(&graph, fast_config(), &launcher).await;

    let deadline = tokio::time::timeout(Duration::from_millis(50), runner.run()).await;
    assert!(deadline.is_err());
    let polls_at_drop = launcher.state_queries();
    assert!(polls_at_drop > 0);

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(launcher.state_queries(), polls_at_drop);
}
