//! Composed-task integration tests.
//!
//! Tests that verify graphs run end to end: ordering, aggregation, labels and
//! launch request contents.

use crate::common::{default_launcher, fast_config, run_graph, succeeded};
use composer::testing::{Script, TestHarness};
use composer::{Event, FailureReason, GraphNode, OutcomeStatus, YamlLoader};
use std::sync::Arc;

fn a_split_d() -> GraphNode {
    GraphNode::sequence([
        GraphNode::task("A"),
        GraphNode::split([GraphNode::task("B"), GraphNode::task("C")]),
        GraphNode::task("D"),
    ])
}

#[tokio::test(start_paused = true)]
async fn test_failed_branch_fails_split_and_stops_sequence() {
    let launcher = Arc::new(default_launcher().with_script("B", Script::exit(1)));

    let report = run_graph(&a_split_d(), fast_config(), &launcher).await;

    assert_eq!(report.outcome.status, OutcomeStatus::Failed);
    assert!(succeeded(&report, "A_0"));
    assert!(!succeeded(&report, "B_0"));
    assert!(succeeded(&report, "C_0"));
    assert!(!succeeded(&report, "split_0"));
    assert!(report.outcome.find("D_0").is_none());

    let launched = launcher.launched_tasks().await;
    assert!(!launched.contains(&"D".to_string()));
    assert_eq!(launched.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_successful_graph_runs_in_order() {
    let launcher = Arc::new(
        default_launcher()
            .with_script("B", Script::exit_after(0, 4))
            .with_script("C", Script::exit_after(0, 2)),
    );

    let report = run_graph(&a_split_d(), fast_config(), &launcher).await;

    assert!(report.success());
    let launched = launcher.launched_tasks().await;
    assert_eq!(launched.first().map(String::as_str), Some("A"));
    assert_eq!(launched.last().map(String::as_str), Some("D"));
    assert_eq!(report.outcome.leaf_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_split_branch_completion_order_does_not_matter() {
    let launcher = Arc::new(
        default_launcher()
            .with_script("slow", Script::exit_after(1, 30))
            .with_script("fast", Script::exit(0)),
    );
    let graph = GraphNode::split([GraphNode::task("slow"), GraphNode::task("fast")]);

    let report = run_graph(&graph, fast_config(), &launcher).await;

    assert!(!report.success());
    assert_eq!(
        report.outcome.find("slow_0").unwrap().reason,
        Some(FailureReason::NonZeroExit { code: 1 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_label_reference_runs_target_again() {
    let launcher = Arc::new(default_launcher());
    let graph = GraphNode::sequence([
        GraphNode::labelled("first", "timestamp").with_argument("--format=iso"),
        GraphNode::label("again", "first"),
    ]);

    let report = run_graph(&graph, fast_config(), &launcher).await;

    assert!(report.success());
    assert!(succeeded(&report, "first"));
    assert!(succeeded(&report, "again"));
    let requests = launcher.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.task_name == "timestamp"));
    assert!(requests.iter().all(|r| r.argument_value("format") == Some("iso")));
}

#[tokio::test(start_paused = true)]
async fn test_uuid_instance_makes_runs_distinct() {
    let launcher = Arc::new(default_launcher());
    let graph = GraphNode::task("ts");
    let config = fast_config().with_uuid_instance_enabled(true);
    let runner = crate::common::build_runner(&graph, config, &launcher).await;

    let first = runner.run().await;
    let second = runner.run().await;

    let requests = launcher.requests().await;
    let tokens: Vec<_> = requests
        .iter()
        .map(|r| r.argument_value("run.id").unwrap().to_string())
        .collect();
    assert_eq!(tokens[0], first.run_id.to_string());
    assert_eq!(tokens[1], second.run_id.to_string());
    assert_ne!(tokens[0], tokens[1]);
}

#[tokio::test(start_paused = true)]
async fn test_runs_without_uuid_reuse_arguments() {
    let launcher = Arc::new(default_launcher());
    let graph = GraphNode::task("ts").with_argument("--date=2024-01-01");
    let runner = crate::common::build_runner(&graph, fast_config(), &launcher).await;

    runner.run().await;
    runner.run().await;

    let requests = launcher.requests().await;
    assert_eq!(requests[0].arguments, requests[1].arguments);
}

#[tokio::test(start_paused = true)]
async fn test_parent_execution_id_and_step_properties() {
    let launcher = Arc::new(default_launcher());
    let graph = GraphNode::sequence([GraphNode::task("extract"), GraphNode::task("load")]);
    let config = fast_config()
        .with_parent_execution_id(12)
        .with_task_property("app.load.mode", "append");

    run_graph(&graph, config, &launcher).await;

    let requests = launcher.requests().await;
    assert!(
        requests
            .iter()
            .all(|r| r.argument_value("parent-execution-id") == Some("12"))
    );
    assert_eq!(requests[0].properties.get("mode"), None);
    assert_eq!(requests[1].properties.get("mode").map(String::as_str), Some("append"));
}

#[tokio::test]
async fn test_definition_from_yaml_runs() {
    let yaml = r#"
name: etl
config:
  interval_time_between_checks_ms: 1
graph:
  type: sequence
  children:
    - { type: task, name: extract }
    - type: split
      branches:
        - { type: task, name: clean, label: clean-a }
        - { type: task, name: clean, label: clean-b }
    - { type: task, name: load }
"#;
    let definition = YamlLoader::parse_definition(yaml).unwrap();
    let harness = TestHarness::new().with_config(definition.config.clone());

    let result = harness.execute_and_assert_success(&definition.graph).await;

    assert!(result.report.outcome.find("clean-a").is_some());
    assert!(result.report.outcome.find("clean-b").is_some());
    let launched = result
        .events
        .iter()
        .filter(|e| matches!(e, Event::StepLaunched { .. }))
        .count();
    assert_eq!(launched, 4);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_failure_and_leaves_task_running() {
    let launcher = Arc::new(default_launcher().with_script("hang", Script::NeverCompletes));
    let config = fast_config().with_max_wait_time(std::time::Duration::from_millis(500));
    let graph = GraphNode::sequence([GraphNode::task("hang"), GraphNode::task("after")]);

    let report = run_graph(&graph, config, &launcher).await;

    let hang = report.outcome.find("hang_0").unwrap();
    assert!(matches!(hang.reason, Some(FailureReason::Timeout { .. })));
    assert!(launcher.is_running(hang.execution_id.unwrap()).await);
    assert!(report.outcome.find("after_0").is_none());
}
