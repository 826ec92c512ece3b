//! Configuration type definitions.
//!
//! [`ComposedTaskConfig`] is the set of knobs one composed-task run consumes;
//! [`SplitPoolConfig`] sizes the worker pool each split creates; and
//! [`ComposedTaskDefinition`] is the on-disk form that bundles a graph with
//! its configuration and, for local runs, the apps it launches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::graph::GraphNode;
use crate::launcher::AppRegistration;

/// Default pause between two completion checks.
pub const DEFAULT_INTERVAL_BETWEEN_CHECKS_MS: u64 = 10_000;

/// Default number of split workers that run without queueing.
pub const DEFAULT_SPLIT_CORE_POOL_SIZE: usize = 4;

/// Default idle time before a surplus split worker is retired.
pub const DEFAULT_SPLIT_KEEP_ALIVE_SECS: u64 = 60;

/// Default platform name.
pub const DEFAULT_PLATFORM_NAME: &str = "default";

/// Worker pool settings for split branches.
///
/// Admission follows the usual thread-pool rule: a branch runs immediately
/// while fewer than `core_pool_size` workers are busy, otherwise it waits in
/// a queue of `queue_capacity`; once the queue is full an overflow worker is
/// added up to `max_pool_size`; past that the branch is rejected.
/// `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitPoolConfig {
    pub core_pool_size: usize,
    pub max_pool_size: Option<usize>,
    pub keep_alive_secs: u64,
    pub queue_capacity: Option<usize>,
    pub allow_core_thread_timeout: bool,
    /// Keep awaiting submitted branches after a shutdown signal.
    pub wait_for_tasks_to_complete_on_shutdown: bool,
}

impl Default for SplitPoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: DEFAULT_SPLIT_CORE_POOL_SIZE,
            max_pool_size: None,
            keep_alive_secs: DEFAULT_SPLIT_KEEP_ALIVE_SECS,
            queue_capacity: None,
            allow_core_thread_timeout: false,
            wait_for_tasks_to_complete_on_shutdown: false,
        }
    }
}

impl SplitPoolConfig {
    pub fn with_core_pool_size(mut self, size: usize) -> Self {
        self.core_pool_size = size;
        self
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_secs = keep_alive.as_secs();
        self
    }

    pub fn with_allow_core_thread_timeout(mut self, allow: bool) -> Self {
        self.allow_core_thread_timeout = allow;
        self
    }

    pub fn with_wait_for_tasks_to_complete_on_shutdown(mut self, wait: bool) -> Self {
        self.wait_for_tasks_to_complete_on_shutdown = wait;
        self
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Workers that run branches without queueing. A zero core size still
    /// gets one worker so queued branches can make progress.
    pub fn effective_core_size(&self) -> usize {
        self.core_pool_size.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(max) = self.max_pool_size {
            if max == 0 {
                return Err(ConfigError::invalid("split.max_pool_size", "cannot be zero"));
            }
            if max < self.core_pool_size {
                return Err(ConfigError::invalid(
                    "split.max_pool_size",
                    format!("{} is below core_pool_size {}", max, self.core_pool_size),
                ));
            }
        }
        Ok(())
    }
}

/// Settings consumed by one composed-task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposedTaskConfig {
    /// How long a launched task may take to report a start time. 0 waits forever.
    pub max_start_wait_time_ms: u64,
    /// How long a launched task may run. 0 waits forever.
    ///
    /// The zero-means-unbounded overload is easy to trip over: leaving the
    /// value unset lets a hung task block its step indefinitely.
    pub max_wait_time_ms: u64,
    /// Pause between completion checks.
    pub interval_time_between_checks_ms: u64,
    pub split: SplitPoolConfig,
    /// Add a `--run.id=<uuid>` argument to every launch so concurrent runs of
    /// the same definition stay distinct.
    pub uuid_instance_enabled: bool,
    /// Platform every step is launched on.
    pub platform_name: String,
    /// Keep running sequence children after a failure. The run still fails.
    pub continue_on_failure: bool,
    /// Execution id of the process driving this run, passed to each step.
    pub parent_execution_id: Option<i64>,
    /// Per-step properties: `app.<step>.<key>` and `deployer.<step>.<key>`.
    pub composed_task_properties: BTreeMap<String, String>,
    /// Per-step extra arguments, keyed by step label or task name.
    pub composed_task_arguments: BTreeMap<String, Vec<String>>,
}

impl Default for ComposedTaskConfig {
    fn default() -> Self {
        Self {
            max_start_wait_time_ms: 0,
            max_wait_time_ms: 0,
            interval_time_between_checks_ms: DEFAULT_INTERVAL_BETWEEN_CHECKS_MS,
            split: SplitPoolConfig::default(),
            uuid_instance_enabled: false,
            platform_name: DEFAULT_PLATFORM_NAME.to_string(),
            continue_on_failure: false,
            parent_execution_id: None,
            composed_task_properties: BTreeMap::new(),
            composed_task_arguments: BTreeMap::new(),
        }
    }
}

impl ComposedTaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_start_wait_time(mut self, wait: Duration) -> Self {
        self.max_start_wait_time_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_interval_between_checks(mut self, interval: Duration) -> Self {
        self.interval_time_between_checks_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_split(mut self, split: SplitPoolConfig) -> Self {
        self.split = split;
        self
    }

    pub fn with_uuid_instance_enabled(mut self, enabled: bool) -> Self {
        self.uuid_instance_enabled = enabled;
        self
    }

    pub fn with_platform_name(mut self, name: impl Into<String>) -> Self {
        self.platform_name = name.into();
        self
    }

    pub fn with_continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    pub fn with_parent_execution_id(mut self, id: i64) -> Self {
        self.parent_execution_id = Some(id);
        self
    }

    pub fn with_task_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.composed_task_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_task_arguments<I, S>(mut self, step: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.composed_task_arguments
            .entry(step.into())
            .or_default()
            .extend(args.into_iter().map(Into::into));
        self
    }

    pub fn max_start_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_start_wait_time_ms)
    }

    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }

    pub fn interval_between_checks(&self) -> Duration {
        Duration::from_millis(self.interval_time_between_checks_ms)
    }

    /// Properties configured for one step, with the `app.<step>.` or
    /// `deployer.<step>.` prefix stripped.
    pub fn properties_for_step(&self, step: &str) -> BTreeMap<String, String> {
        let prefixes = [format!("app.{}.", step), format!("deployer.{}.", step)];
        let mut out = BTreeMap::new();
        for (key, value) in &self.composed_task_properties {
            if let Some(stripped) = prefixes.iter().find_map(|p| key.strip_prefix(p.as_str())) {
                out.insert(stripped.to_string(), value.clone());
            }
        }
        out
    }

    /// Extra arguments configured for one step.
    pub fn arguments_for_step(&self, step: &str) -> &[String] {
        self.composed_task_arguments
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Check every value before the engine is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform_name.trim().is_empty() {
            return Err(ConfigError::MissingField("platform_name"));
        }
        if self.interval_time_between_checks_ms == 0 {
            return Err(ConfigError::invalid(
                "interval_time_between_checks_ms",
                "must be greater than zero",
            ));
        }
        self.split.validate()
    }
}

/// Concurrency limit of the local platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPlatformConfig {
    pub maximum_task_executions: u32,
}

impl Default for LocalPlatformConfig {
    fn default() -> Self {
        Self {
            maximum_task_executions: 20,
        }
    }
}

/// A composed task as written in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedTaskDefinition {
    /// Name of the composed task.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Run configuration.
    #[serde(default)]
    pub config: ComposedTaskConfig,
    /// The task graph.
    pub graph: GraphNode,
    /// Apps available to the local launcher, keyed by task name.
    #[serde(default)]
    pub apps: BTreeMap<String, AppRegistration>,
    /// Local platform limits.
    #[serde(default)]
    pub local: LocalPlatformConfig,
}
