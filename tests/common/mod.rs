//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use composer::testing::ScriptedLauncher;
use composer::{ComposedTaskConfig, ComposedTaskRunner, GraphNode, RunReport};
use std::sync::Arc;
use std::time::Duration;

/// Configuration with a 10ms check interval on the `default` platform.
pub fn fast_config() -> ComposedTaskConfig {
    ComposedTaskConfig::default().with_interval_between_checks(Duration::from_millis(10))
}

/// A scripted launcher with a roomy `default` platform.
pub fn default_launcher() -> ScriptedLauncher {
    ScriptedLauncher::new().with_platform("default", 100, 0)
}

/// Build a runner, panicking if construction fails.
pub async fn build_runner(
    graph: &GraphNode,
    config: ComposedTaskConfig,
    launcher: &Arc<ScriptedLauncher>,
) -> ComposedTaskRunner {
    ComposedTaskRunner::new("it", graph, config, launcher.clone(), launcher.clone())
        .await
        .unwrap()
}

/// Run `graph` once and return the report.
pub async fn run_graph(
    graph: &GraphNode,
    config: ComposedTaskConfig,
    launcher: &Arc<ScriptedLauncher>,
) -> RunReport {
    build_runner(graph, config, launcher).await.run().await
}

/// Whether the outcome for `node` exists and succeeded.
pub fn succeeded(report: &RunReport, node: &str) -> bool {
    report
        .outcome
        .find(node)
        .unwrap_or_else(|| panic!("no outcome for {}", node))
        .is_success()
}
