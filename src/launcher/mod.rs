//! Boundary to the external task-launching service.
//!
//! The engine never deploys anything itself. It hands a [`LaunchRequest`] to a
//! [`TaskLauncher`] and watches the resulting execution through a
//! [`TaskExplorer`]. Platform-specific deployers (containers, cloud foundries,
//! local processes) live behind these traits.

mod local;

pub use local::{AppRegistration, LocalTaskLauncher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::types::ExecutionId;

/// Deployment property naming the platform a task should run on.
pub const PLATFORM_NAME_PROPERTY: &str = "platform.name";

/// Errors reported by a launcher or explorer implementation.
#[derive(Debug, Clone, Error)]
pub enum LauncherError {
    /// The launcher refused the request.
    #[error("launch rejected: {0}")]
    Rejected(String),

    /// No task definition is registered under the requested name.
    #[error("unknown task definition: {0}")]
    UnknownTask(String),

    /// The launcher could not be reached or failed internally.
    #[error("launcher unavailable: {0}")]
    Unavailable(String),
}

/// A request to launch one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Task definition to launch.
    pub task_name: String,
    /// Command-line arguments.
    pub arguments: Vec<String>,
    /// Deployment properties.
    pub properties: BTreeMap<String, String>,
    /// Platform the request is meant for.
    pub platform: String,
}

impl LaunchRequest {
    pub fn new(task_name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            arguments: Vec::new(),
            properties: BTreeMap::new(),
            platform: platform.into(),
        }
    }

    pub fn with_argument(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Value of an argument of the form `--key=value`.
    pub fn argument_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("--{}=", key);
        self.arguments
            .iter()
            .find_map(|arg| arg.strip_prefix(prefix.as_str()))
    }
}

/// State of a launched task as reported by the task subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecutionHandle {
    pub execution_id: ExecutionId,
    /// Set once the task has actually started.
    pub start_time: Option<DateTime<Utc>>,
    /// Set once the task has finished; the handle is terminal from then on.
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl TaskExecutionHandle {
    /// A freshly launched execution that has not reported anything yet.
    pub fn pending(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            start_time: None,
            end_time: None,
            exit_code: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Capacity of one platform at the moment it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCapacitySnapshot {
    pub name: String,
    pub maximum_task_executions: u32,
    pub running_execution_count: u32,
}

impl PlatformCapacitySnapshot {
    pub fn has_capacity(&self) -> bool {
        self.running_execution_count < self.maximum_task_executions
    }
}

/// A platform the launcher can deploy to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub name: String,
}

/// Launches tasks and reports platform capacity.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Launch a task and return the execution id assigned to it.
    async fn launch(&self, request: &LaunchRequest) -> Result<ExecutionId, LauncherError>;

    /// Current execution counts for every platform.
    async fn current_executions(&self) -> Result<Vec<PlatformCapacitySnapshot>, LauncherError>;

    /// Every configured platform.
    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>, LauncherError>;
}

/// Reads the state of launched executions.
#[async_trait]
pub trait TaskExplorer: Send + Sync {
    /// Latest state of an execution, or `None` if it is not visible yet.
    async fn get_execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<TaskExecutionHandle>, LauncherError>;
}
