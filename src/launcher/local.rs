//! Local process launcher.
//!
//! [`LocalTaskLauncher`] runs registered task definitions as child processes
//! on the current host and keeps their execution state in memory. It reports a
//! single platform whose concurrency limit is set at construction.
//!
//! An execution is forgotten once its terminal state has been reported by
//! [`TaskExplorer::get_execution`]; later queries for it return `None`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    LaunchRequest, LauncherError, PlatformCapacitySnapshot, PlatformInfo, TaskExecutionHandle,
    TaskExplorer, TaskLauncher,
};
use crate::core::types::ExecutionId;

/// How to start a registered task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRegistration {
    /// Program to execute.
    pub command: String,
    /// Arguments placed before the launch request's own arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl AppRegistration {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Launches registered apps as local child processes.
pub struct LocalTaskLauncher {
    platform: String,
    maximum_task_executions: u32,
    apps: HashMap<String, AppRegistration>,
    next_id: AtomicI64,
    running: Arc<AtomicU32>,
    executions: Arc<RwLock<HashMap<ExecutionId, TaskExecutionHandle>>>,
}

impl LocalTaskLauncher {
    /// Create a launcher for `platform` allowing `maximum_task_executions` concurrent tasks.
    pub fn new(platform: impl Into<String>, maximum_task_executions: u32) -> Self {
        Self {
            platform: platform.into(),
            maximum_task_executions,
            apps: HashMap::new(),
            next_id: AtomicI64::new(1),
            running: Arc::new(AtomicU32::new(0)),
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a task definition.
    pub fn register(mut self, name: impl Into<String>, app: AppRegistration) -> Self {
        self.apps.insert(name.into(), app);
        self
    }

    /// Register several task definitions at once.
    pub fn register_all(
        mut self,
        apps: impl IntoIterator<Item = (String, AppRegistration)>,
    ) -> Self {
        self.apps.extend(apps);
        self
    }

    /// Executions whose terminal state has not been reported yet.
    pub async fn tracked_executions(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Number of child processes still running.
    pub fn running_count(&self) -> u32 {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskLauncher for LocalTaskLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<ExecutionId, LauncherError> {
        if request.platform != self.platform {
            return Err(LauncherError::Rejected(format!(
                "platform '{}' is not served by this launcher ('{}')",
                request.platform, self.platform
            )));
        }
        let app = self
            .apps
            .get(&request.task_name)
            .ok_or_else(|| LauncherError::UnknownTask(request.task_name.clone()))?;

        let mut cmd = Command::new(&app.command);
        cmd.args(&app.args)
            .args(&request.arguments)
            .envs(&request.properties)
            .stdin(Stdio::null());
        if let Some(dir) = &app.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            LauncherError::Rejected(format!("failed to spawn '{}': {}", app.command, e))
        })?;

        let id = ExecutionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut handle = TaskExecutionHandle::pending(id);
        handle.start_time = Some(Utc::now());
        self.executions.write().await.insert(id, handle);
        self.running.fetch_add(1, Ordering::SeqCst);
        debug!(task = %request.task_name, execution_id = %id, "spawned local task");

        let executions = Arc::clone(&self.executions);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(execution_id = %id, error = %e, "failed to wait for local task");
                    None
                }
            };
            let mut executions = executions.write().await;
            if let Some(handle) = executions.get_mut(&id) {
                handle.end_time = Some(Utc::now());
                handle.exit_code = exit_code;
            }
            running.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(id)
    }

    async fn current_executions(&self) -> Result<Vec<PlatformCapacitySnapshot>, LauncherError> {
        Ok(vec![PlatformCapacitySnapshot {
            name: self.platform.clone(),
            maximum_task_executions: self.maximum_task_executions,
            running_execution_count: self.running_count(),
        }])
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>, LauncherError> {
        Ok(vec![PlatformInfo {
            name: self.platform.clone(),
        }])
    }
}

#[async_trait]
impl TaskExplorer for LocalTaskLauncher {
    async fn get_execution(
        &self,
        id: ExecutionId,
    ) -> Result<Option<TaskExecutionHandle>, LauncherError> {
        let mut executions = self.executions.write().await;
        let handle = executions.get(&id).cloned();
        if handle.as_ref().is_some_and(TaskExecutionHandle::is_terminal) {
            executions.remove(&id);
        }
        Ok(handle)
    }
}
