//! Local launcher integration tests.
//!
//! These run real child processes, so they use the wall clock.

#![cfg(unix)]

use composer::{ComposedTaskRunner, FailureReason, LocalTaskLauncher, YamlLoader};
use std::sync::Arc;

const DEFINITION: &str = r#"
name: local-etl
config:
  interval_time_between_checks_ms: 10
  max_wait_time_ms: 10000
graph:
  type: sequence
  children:
    - { type: task, name: ok, label: first }
    - type: split
      branches:
        - { type: task, name: ok, label: left }
        - { type: task, name: ok, label: right }
    - { type: task, name: finish }
apps:
  ok:
    command: "true"
  finish:
    command: sh
    args: ["-c", "exit {code}"]
local:
  maximum_task_executions: 4
"#;

fn definition_with_exit(code: i32) -> composer::ComposedTaskDefinition {
    let yaml = DEFINITION.replace("{code}", &code.to_string());
    YamlLoader::parse_definition(&yaml).unwrap()
}

async fn run(code: i32) -> composer::RunReport {
    let definition = definition_with_exit(code);
    let launcher = Arc::new(
        LocalTaskLauncher::new(
            definition.config.platform_name.clone(),
            definition.local.maximum_task_executions,
        )
        .register_all(definition.apps.clone()),
    );
    let runner = ComposedTaskRunner::from_definition(&definition, launcher.clone(), launcher)
        .await
        .unwrap();
    runner.run().await
}

#[tokio::test]
async fn test_local_processes_succeed() {
    let report = run(0).await;

    assert!(report.success(), "{:?}", report.outcome);
    assert_eq!(report.outcome.leaf_count(), 4);
}

#[tokio::test]
async fn test_local_nonzero_exit_fails_run() {
    let report = run(2).await;

    assert!(!report.success());
    let failed = report.outcome.failed_steps();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, Some(FailureReason::NonZeroExit { code: 2 }));
}

#[tokio::test]
async fn test_unregistered_app_is_rejected() {
    let definition = definition_with_exit(0);
    let launcher = Arc::new(LocalTaskLauncher::new("default", 4));
    let runner = ComposedTaskRunner::from_definition(&definition, launcher.clone(), launcher)
        .await
        .unwrap();

    let report = runner.run().await;

    assert!(matches!(
        report.outcome.find("first").unwrap().reason,
        Some(FailureReason::LaunchRejected { .. })
    ));
}
