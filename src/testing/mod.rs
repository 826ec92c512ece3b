//! Testing utilities for users of the composer library.
//!
//! This module provides helpers for testing composed tasks without a real
//! task platform:
//!
//! - [`ScriptedLauncher`]: An in-memory launcher and explorer whose tasks
//!   follow per-task [`Script`]s
//! - [`RecordingHandler`]: An event handler that keeps every event
//! - [`TestHarness`]: Runs graphs against a scripted launcher

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::ComposedTaskConfig;
use crate::core::graph::GraphNode;
use crate::core::types::{ExecutionId, RunId};
use crate::events::{Event, EventBus, EventHandler};
use crate::execution::{ComposedTaskRunner, RunContext, RunReport, RunnerError};
use crate::launcher::{
    LaunchRequest, LauncherError, PlatformCapacitySnapshot, PlatformInfo, TaskExecutionHandle,
    TaskExplorer, TaskLauncher,
};

/// How a scripted task behaves once launched.
///
/// Poll counts are per execution: every `get_execution` call is one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Start immediately and end with `code` on the `after_polls`-th poll.
    Exit { code: i32, after_polls: u32 },
    /// Start immediately and never end.
    NeverCompletes,
    /// Never report a start time.
    NeverStarts,
    /// End on the first poll without an exit code.
    MissingExitCode,
    /// Fail the first `failures` queries, then end with `code`.
    FlakyQuery { failures: u32, code: i32 },
    /// Refuse the launch.
    Reject(String),
}

impl Script {
    /// End with `code` on the first poll.
    pub fn exit(code: i32) -> Self {
        Script::Exit {
            code,
            after_polls: 1,
        }
    }

    /// End with `code` on the `polls`-th poll.
    pub fn exit_after(code: i32, polls: u32) -> Self {
        Script::Exit {
            code,
            after_polls: polls.max(1),
        }
    }
}

struct Tracked {
    script: Script,
    platform: String,
    polls: u32,
    handle: TaskExecutionHandle,
}

#[derive(Default)]
struct LauncherState {
    platforms: Vec<PlatformCapacitySnapshot>,
    executions: HashMap<ExecutionId, Tracked>,
    requests: Vec<LaunchRequest>,
    launched: Vec<String>,
    peak_running: u32,
}

impl LauncherState {
    fn live(&self, platform: &str) -> u32 {
        self.executions
            .values()
            .filter(|t| t.platform == platform && !t.handle.is_terminal())
            .count() as u32
    }
}

/// An in-memory [`TaskLauncher`] and [`TaskExplorer`].
///
/// Running counts reported for a platform are the configured base count plus
/// every launched execution on it that has not ended yet.
///
/// # Example
///
/// ```
/// use composer::testing::{Script, ScriptedLauncher};
///
/// let launcher = ScriptedLauncher::new()
///     .with_platform("default", 4, 0)
///     .with_script("flaky-export", Script::exit(1));
/// ```
pub struct ScriptedLauncher {
    state: Mutex<LauncherState>,
    scripts: HashMap<String, Script>,
    default_script: Script,
    next_id: AtomicI64,
    capacity_queries: AtomicU32,
    state_queries: AtomicU32,
}

impl ScriptedLauncher {
    /// A launcher with no platforms where every task exits 0 on the first poll.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LauncherState::default()),
            scripts: HashMap::new(),
            default_script: Script::exit(0),
            next_id: AtomicI64::new(1),
            capacity_queries: AtomicU32::new(0),
            state_queries: AtomicU32::new(0),
        }
    }

    /// Add a platform with a limit and a base running count.
    pub fn with_platform(mut self, name: impl Into<String>, maximum: u32, running: u32) -> Self {
        self.state.get_mut().platforms.push(PlatformCapacitySnapshot {
            name: name.into(),
            maximum_task_executions: maximum,
            running_execution_count: running,
        });
        self
    }

    /// Script the behaviour of one task name.
    pub fn with_script(mut self, task_name: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(task_name.into(), script);
        self
    }

    /// Script every task name without its own script.
    pub fn with_default_script(mut self, script: Script) -> Self {
        self.default_script = script;
        self
    }

    /// Change a platform's base running count.
    pub async fn set_running(&self, platform: &str, running: u32) {
        let mut state = self.state.lock().await;
        if let Some(p) = state.platforms.iter_mut().find(|p| p.name == platform) {
            p.running_execution_count = running;
        }
    }

    pub async fn add_platform(&self, name: impl Into<String>, maximum: u32, running: u32) {
        self.state.lock().await.platforms.push(PlatformCapacitySnapshot {
            name: name.into(),
            maximum_task_executions: maximum,
            running_execution_count: running,
        });
    }

    pub async fn remove_platform(&self, name: &str) {
        self.state.lock().await.platforms.retain(|p| p.name != name);
    }

    /// Every request that reached the launcher, including refused ones.
    pub async fn requests(&self) -> Vec<LaunchRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Task names of accepted launches, in launch order.
    pub async fn launched_tasks(&self) -> Vec<String> {
        self.state.lock().await.launched.clone()
    }

    /// Whether an execution has been launched and has not ended.
    pub async fn is_running(&self, id: ExecutionId) -> bool {
        self.state
            .lock()
            .await
            .executions
            .get(&id)
            .is_some_and(|t| !t.handle.is_terminal())
    }

    /// Highest number of simultaneously running executions seen at launch.
    pub async fn peak_running(&self) -> u32 {
        self.state.lock().await.peak_running
    }

    /// Number of `current_executions` calls made so far.
    pub fn capacity_queries(&self) -> u32 {
        self.capacity_queries.load(Ordering::SeqCst)
    }

    /// Number of `get_execution` calls made so far.
    pub fn state_queries(&self) -> u32 {
        self.state_queries.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskLauncher for ScriptedLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<ExecutionId, LauncherError> {
        let script = self
            .scripts
            .get(&request.task_name)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());

        let mut state = self.state.lock().await;
        state.requests.push(request.clone());
        if let Script::Reject(message) = &script {
            return Err(LauncherError::Rejected(message.clone()));
        }

        let id = ExecutionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut handle = TaskExecutionHandle::pending(id);
        if script != Script::NeverStarts {
            handle.start_time = Some(Utc::now());
        }
        state.executions.insert(
            id,
            Tracked {
                script,
                platform: request.platform.clone(),
                polls: 0,
                handle,
            },
        );
        state.launched.push(request.task_name.clone());

        let live = state
            .executions
            .values()
            .filter(|t| !t.handle.is_terminal())
            .count() as u32;
        state.peak_running = state.peak_running.max(live);
        Ok(id)
    }

    async fn current_executions(&self) -> Result<Vec<PlatformCapacitySnapshot>, LauncherError> {
        self.capacity_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        Ok(state
            .platforms
            .iter()
            .map(|p| PlatformCapacitySnapshot {
                running_execution_count: p.running_execution_count + state.live(&p.name),
                ..p.clone()
            })
            .collect())
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>, LauncherError> {
        let state = self.state.lock().await;
        Ok(state
            .platforms
            .iter()
            .map(|p| PlatformInfo {
                name: p.name.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl TaskExplorer for ScriptedLauncher {
    async fn get_execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<TaskExecutionHandle>, LauncherError> {
        self.state_queries.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let Some(tracked) = state.executions.get_mut(&id) else {
            return Ok(None);
        };
        tracked.polls += 1;

        let finish = match tracked.script {
            Script::Exit { code, after_polls } if tracked.polls >= after_polls => Some(Some(code)),
            Script::MissingExitCode => Some(None),
            Script::FlakyQuery { failures, .. } if tracked.polls <= failures => {
                return Err(LauncherError::Unavailable(format!(
                    "query {} of execution {} failed",
                    tracked.polls, id
                )));
            }
            Script::FlakyQuery { code, .. } => Some(Some(code)),
            _ => None,
        };

        if let Some(exit_code) = finish
            && !tracked.handle.is_terminal()
        {
            tracked.handle.end_time = Some(Utc::now());
            tracked.handle.exit_code = exit_code;
        }
        Ok(Some(tracked.handle.clone()))
    }
}

/// Event handler that records every event it receives.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Test harness for running graphs against a [`ScriptedLauncher`].
///
/// # Example
///
/// ```
/// use composer::GraphNode;
/// use composer::testing::{Script, ScriptedLauncher, TestHarness};
///
/// # tokio_test();
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn tokio_test() {
/// let harness = TestHarness::new().with_launcher(
///     ScriptedLauncher::new()
///         .with_platform("default", 10, 0)
///         .with_script("b", Script::exit(1)),
/// );
///
/// let graph = GraphNode::sequence([GraphNode::task("a"), GraphNode::task("b")]);
/// let result = harness.execute_and_assert_failure(&graph).await;
/// assert_eq!(result.report.failed_count(), 1);
/// # }
/// ```
pub struct TestHarness {
    launcher: Arc<ScriptedLauncher>,
    config: ComposedTaskConfig,
}

/// Result from TestHarness execution.
pub struct TestResult {
    /// The run report.
    pub report: RunReport,
    /// Every event published during the run.
    pub events: Vec<Event>,
}

impl TestHarness {
    /// A harness with one `default` platform and a 1ms check interval.
    pub fn new() -> Self {
        Self {
            launcher: Arc::new(ScriptedLauncher::new().with_platform("default", 100, 0)),
            config: ComposedTaskConfig::default()
                .with_interval_between_checks(Duration::from_millis(1)),
        }
    }

    pub fn with_launcher(mut self, launcher: ScriptedLauncher) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    pub fn with_config(mut self, config: ComposedTaskConfig) -> Self {
        self.config = config;
        self
    }

    /// The launcher runs go through, for inspecting requests afterwards.
    pub fn launcher(&self) -> &Arc<ScriptedLauncher> {
        &self.launcher
    }

    /// Build a runner and run `graph` once.
    pub async fn execute(&self, graph: &GraphNode) -> Result<TestResult, RunnerError> {
        let runner = ComposedTaskRunner::new(
            "harness",
            graph,
            self.config.clone(),
            self.launcher.clone(),
            self.launcher.clone(),
        )
        .await?;

        let bus = Arc::new(EventBus::new());
        let handler = Arc::new(RecordingHandler::new());
        bus.register(handler.clone()).await;

        let report = runner
            .run_with(RunContext::new(RunId::new()).with_event_bus(bus))
            .await;
        Ok(TestResult {
            report,
            events: handler.events().await,
        })
    }

    /// Execute and assert success.
    pub async fn execute_and_assert_success(&self, graph: &GraphNode) -> TestResult {
        let result = match self.execute(graph).await {
            Ok(result) => result,
            Err(e) => panic!("Expected graph to run, but the runner failed to build: {}", e),
        };
        assert!(
            result.report.success(),
            "Expected graph to succeed, but it failed. Failed steps: {:?}",
            result
                .report
                .outcome
                .failed_steps()
                .iter()
                .map(|o| o.node.to_string())
                .collect::<Vec<_>>()
        );
        result
    }

    /// Execute and assert failure.
    pub async fn execute_and_assert_failure(&self, graph: &GraphNode) -> TestResult {
        let result = match self.execute(graph).await {
            Ok(result) => result,
            Err(e) => panic!("Expected graph to run, but the runner failed to build: {}", e),
        };
        assert!(
            !result.report.success(),
            "Expected graph to fail, but it succeeded"
        );
        result
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
