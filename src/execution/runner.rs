//! Composed-task runner.
//!
//! The `ComposedTaskRunner` is built once per composed task. Construction
//! validates configuration, compiles the graph and checks that the configured
//! platform exists, so misconfiguration fails before anything is launched.
//! Each call to [`ComposedTaskRunner::run`] then walks the plan:
//!
//! - launch directives go to the [`ExecutionUnit`]
//! - sequences go to the [`SequenceRunner`]
//! - splits go to the [`SplitCoordinator`]

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span};

use super::admission::{AdmissionController, AdmissionError};
use super::context::RunContext;
use super::sequence::SequenceRunner;
use super::split::SplitCoordinator;
use super::unit::ExecutionUnit;
use crate::config::{ComposedTaskConfig, ComposedTaskDefinition, ConfigError};
use crate::core::graph::GraphNode;
use crate::core::outcome::ExecutionOutcome;
use crate::core::plan::{ExecutionPlan, MalformedGraphError, PlanEntry, compile};
use crate::core::types::RunId;
use crate::events::{Event, EventBus};
use crate::launcher::{TaskExplorer, TaskLauncher};

/// Errors that prevent a runner from being built.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] MalformedGraphError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

/// Result of one composed-task run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub name: String,
    pub outcome: ExecutionOutcome,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Number of launch steps that failed.
    pub fn failed_count(&self) -> usize {
        self.outcome.failed_steps().len()
    }
}

/// Dispatches plan entries to the component that runs them.
pub(crate) struct Engine {
    unit: ExecutionUnit,
    sequence: SequenceRunner,
    split: SplitCoordinator,
}

impl Engine {
    pub(crate) fn new(
        config: Arc<ComposedTaskConfig>,
        launcher: Arc<dyn TaskLauncher>,
        explorer: Arc<dyn TaskExplorer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sequence: SequenceRunner::new(config.continue_on_failure),
            split: SplitCoordinator::new(config.split.clone()),
            unit: ExecutionUnit::new(config, launcher, explorer),
        })
    }

    pub(crate) fn run_entry<'a>(
        self: &'a Arc<Self>,
        entry: &'a PlanEntry,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, ExecutionOutcome> {
        async move {
            match entry {
                PlanEntry::Launch(directive) => self.unit.run(directive, ctx).await,
                PlanEntry::Sequence(sequence) => self.sequence.run(self, sequence, ctx).await,
                PlanEntry::Split(split) => self.split.run(self, split, ctx).await,
            }
        }
        .boxed()
    }
}

/// Runs one compiled composed task against a launcher.
pub struct ComposedTaskRunner {
    name: String,
    config: Arc<ComposedTaskConfig>,
    plan: ExecutionPlan,
    engine: Arc<Engine>,
    event_bus: Option<Arc<EventBus>>,
}

impl ComposedTaskRunner {
    /// Validate, compile and check the platform. Nothing is launched.
    pub async fn new(
        name: impl Into<String>,
        graph: &GraphNode,
        config: ComposedTaskConfig,
        launcher: Arc<dyn TaskLauncher>,
        explorer: Arc<dyn TaskExplorer>,
    ) -> Result<Self, RunnerError> {
        let name = name.into();
        config.validate()?;
        let plan = compile(graph)?;

        AdmissionController::new(Arc::clone(&launcher))
            .verify_platform(&config.platform_name)
            .await?;

        debug!(
            composed_task = %name,
            steps = plan.step_count(),
            split_depth = plan.max_split_depth(),
            trace = ?plan.trace(),
            "compiled composed task"
        );

        let config = Arc::new(config);
        let engine = Engine::new(Arc::clone(&config), launcher, explorer);

        Ok(Self {
            name,
            config,
            plan,
            engine,
            event_bus: None,
        })
    }

    /// Build a runner for a loaded definition.
    pub async fn from_definition(
        definition: &ComposedTaskDefinition,
        launcher: Arc<dyn TaskLauncher>,
        explorer: Arc<dyn TaskExplorer>,
    ) -> Result<Self, RunnerError> {
        Self::new(
            definition.name.clone(),
            &definition.graph,
            definition.config.clone(),
            launcher,
            explorer,
        )
        .await
    }

    /// Publish lifecycle events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ComposedTaskConfig {
        &self.config
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Run the plan once with a fresh run id and no external signals.
    pub async fn run(&self) -> RunReport {
        self.run_with(RunContext::new(RunId::new())).await
    }

    /// Run the plan with caller-supplied signals.
    pub async fn run_with(&self, mut ctx: RunContext) -> RunReport {
        if ctx.events.is_none() {
            ctx.events = self.event_bus.clone();
        }
        let run_id = ctx.run_id;
        let span = info_span!("composed_task_run", composed_task = %self.name, run = %run_id);

        async {
            let start = Instant::now();
            info!(steps = self.plan.step_count(), "starting composed task");
            ctx.emit(Event::run_started(run_id, &self.name)).await;

            let outcome = self.engine.run_entry(self.plan.root(), &ctx).await;
            let duration = start.elapsed();

            if outcome.is_success() {
                info!(duration_ms = %duration.as_millis(), "composed task succeeded");
            } else {
                let failed: Vec<String> = outcome
                    .failed_steps()
                    .iter()
                    .map(|o| o.node.to_string())
                    .collect();
                error!(
                    duration_ms = %duration.as_millis(),
                    failed = ?failed,
                    "composed task failed"
                );
            }
            ctx.emit(Event::run_completed(run_id, outcome.is_success(), duration))
                .await;

            RunReport {
                run_id,
                name: self.name.clone(),
                outcome,
                duration,
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplitPoolConfig;
    use crate::core::outcome::FailureReason;
    use crate::testing::{RecordingHandler, Script, ScriptedLauncher};
    use tokio_util::sync::CancellationToken;

    fn config() -> ComposedTaskConfig {
        ComposedTaskConfig::default().with_interval_between_checks(Duration::from_millis(10))
    }

    async fn runner(
        graph: &GraphNode,
        config: ComposedTaskConfig,
        launcher: &Arc<ScriptedLauncher>,
    ) -> ComposedTaskRunner {
        ComposedTaskRunner::new("test", graph, config, launcher.clone(), launcher.clone())
            .await
            .unwrap()
    }

    fn launcher() -> ScriptedLauncher {
        ScriptedLauncher::new().with_platform("default", 100, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_stops_at_first_failure() {
        let launcher = Arc::new(launcher().with_script("b", Script::exit(1)));
        let graph = GraphNode::sequence([
            GraphNode::task("a"),
            GraphNode::task("b"),
            GraphNode::task("c"),
        ]);

        let report = runner(&graph, config(), &launcher).await.run().await;

        assert!(!report.success());
        assert_eq!(launcher.launched_tasks().await, vec!["a", "b"]);
        assert_eq!(report.outcome.children.len(), 2);
        assert!(report.outcome.find("c_0").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_failure_runs_every_child() {
        let launcher = Arc::new(launcher().with_script("b", Script::exit(1)));
        let graph = GraphNode::sequence([
            GraphNode::task("a"),
            GraphNode::task("b"),
            GraphNode::task("c"),
        ]);

        let report = runner(&graph, config().with_continue_on_failure(true), &launcher)
            .await
            .run()
            .await;

        assert!(!report.success());
        assert_eq!(launcher.launched_tasks().await, vec!["a", "b", "c"]);
        assert_eq!(report.failed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_waits_for_every_branch() {
        let launcher = Arc::new(
            launcher()
                .with_script("fast-fail", Script::exit(3))
                .with_script("slow", Script::exit_after(0, 20)),
        );
        let graph = GraphNode::split([GraphNode::task("fast-fail"), GraphNode::task("slow")]);

        let report = runner(&graph, config(), &launcher).await.run().await;

        assert!(!report.success());
        let slow = report.outcome.find("slow_0").unwrap();
        assert!(slow.is_success());
        assert!(report.outcome.find("fast-fail_0").unwrap().is_failed());
        assert_eq!(launcher.peak_running().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_pool_limits_concurrency() {
        let launcher = Arc::new(launcher().with_default_script(Script::exit_after(0, 5)));
        let graph =
            GraphNode::split((0..6).map(|i| GraphNode::labelled(format!("b{}", i), "work")));
        let config = config().with_split(SplitPoolConfig::default().with_core_pool_size(2));

        let report = runner(&graph, config, &launcher).await.run().await;

        assert!(report.success());
        assert_eq!(report.outcome.children.len(), 6);
        assert_eq!(launcher.peak_running().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_pool_rejection_fails_branch() {
        let launcher = Arc::new(launcher().with_default_script(Script::exit_after(0, 5)));
        let graph = GraphNode::split([
            GraphNode::labelled("x", "work"),
            GraphNode::labelled("y", "work"),
            GraphNode::labelled("z", "work"),
        ]);
        let split = SplitPoolConfig::default()
            .with_core_pool_size(1)
            .with_queue_capacity(0)
            .with_max_pool_size(2);

        let report = runner(&graph, config().with_split(split), &launcher)
            .await
            .run()
            .await;

        assert!(!report.success());
        assert_eq!(report.failed_count(), 1);
        assert_eq!(
            report.outcome.find("z").unwrap().reason,
            Some(FailureReason::PoolRejected)
        );
        assert_eq!(launcher.launched_tasks().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_splits_each_get_a_pool() {
        let launcher = Arc::new(launcher().with_default_script(Script::exit_after(0, 3)));
        let graph = GraphNode::split([
            GraphNode::split([GraphNode::task("a"), GraphNode::task("b")]),
            GraphNode::split([GraphNode::task("c"), GraphNode::task("d")]),
        ]);
        let config = config().with_split(SplitPoolConfig::default().with_core_pool_size(2));

        let report = runner(&graph, config, &launcher).await.run().await;

        assert!(report.success());
        assert_eq!(report.outcome.leaf_count(), 4);
        assert_eq!(launcher.peak_running().await, 4);
    }

    #[tokio::test]
    async fn test_construction_fails_on_unknown_platform() {
        let launcher = Arc::new(launcher());
        let result = ComposedTaskRunner::new(
            "test",
            &GraphNode::task("a"),
            config().with_platform_name("k8s"),
            launcher.clone(),
            launcher.clone(),
        )
        .await;

        assert!(matches!(
            result,
            Err(RunnerError::Admission(AdmissionError::UnknownPlatform { .. }))
        ));
        assert!(launcher.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_construction_fails_on_malformed_graph() {
        let launcher = Arc::new(launcher());
        let result = ComposedTaskRunner::new(
            "test",
            &GraphNode::label("a", "missing"),
            config(),
            launcher.clone(),
            launcher.clone(),
        )
        .await;

        assert!(matches!(
            result,
            Err(RunnerError::Graph(MalformedGraphError::UndefinedTarget { .. }))
        ));
    }

    #[tokio::test]
    async fn test_construction_fails_on_invalid_config() {
        let launcher = Arc::new(launcher());
        let result = ComposedTaskRunner::new(
            "test",
            &GraphNode::task("a"),
            config().with_platform_name(""),
            launcher.clone(),
            launcher.clone(),
        )
        .await;

        assert!(matches!(result, Err(RunnerError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sequence_before_next_child() {
        let launcher = Arc::new(launcher().with_default_script(Script::exit_after(0, 10)));
        let graph = GraphNode::sequence([GraphNode::task("a"), GraphNode::task("b")]);
        let runner = runner(&graph, config(), &launcher).await;
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            trigger.cancel();
        });
        let report = runner
            .run_with(RunContext::new(RunId::new()).with_shutdown(shutdown))
            .await;

        assert!(!report.success());
        assert!(report.outcome.find("a_0").unwrap().is_success());
        assert_eq!(
            report.outcome.find("b_0").unwrap().reason,
            Some(FailureReason::ShutdownInProgress)
        );
        assert_eq!(launcher.launched_tasks().await, vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_published() {
        let launcher = Arc::new(launcher().with_script("b", Script::exit(1)));
        let bus = Arc::new(EventBus::new());
        let handler = Arc::new(RecordingHandler::new());
        bus.register(handler.clone()).await;
        let graph = GraphNode::split([GraphNode::task("a"), GraphNode::task("b")]);

        let report = runner(&graph, config(), &launcher)
            .await
            .with_event_bus(bus)
            .run()
            .await;

        let events = handler.events().await;
        assert!(matches!(events.first(), Some(Event::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(Event::RunCompleted { success: false, .. })
        ));
        assert!(events.iter().any(|e| matches!(e, Event::SplitStarted { branches: 2, .. })));
        assert!(events.iter().any(|e| matches!(e, Event::StepCompleted { .. })));
        assert!(events.iter().any(|e| matches!(e, Event::StepFailed { .. })));
        assert!(events.iter().all(|e| match e {
            Event::RunStarted { run_id, .. } | Event::RunCompleted { run_id, .. } => {
                *run_id == report.run_id
            }
            _ => true,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_serializes() {
        let launcher = Arc::new(launcher());
        let report = runner(&GraphNode::task("a"), config(), &launcher).await.run().await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["name"], "test");
        assert_eq!(json["outcome"]["status"], "SUCCEEDED");
        assert_eq!(json["outcome"]["node"], "a_0");
    }
}
