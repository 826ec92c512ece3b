//! Execution of a single launch directive.
//!
//! The `ExecutionUnit` handles one step end to end:
//! - Admission check against the configured platform
//! - Launch request assembly and validation
//! - Completion polling and exit-code mapping

use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::admission::{AdmissionController, AdmissionError};
use super::context::RunContext;
use super::poller::{CompletionPoller, PollPolicy, PollState};
use crate::config::ComposedTaskConfig;
use crate::core::outcome::{ExecutionOutcome, FailureReason};
use crate::core::plan::LaunchDirective;
use crate::core::types::ExecutionId;
use crate::events::Event;
use crate::launcher::{LaunchRequest, PLATFORM_NAME_PROPERTY, TaskExplorer, TaskLauncher};

/// Argument carrying the execution id of the process driving the run.
pub const PARENT_EXECUTION_ID_ARG: &str = "parent-execution-id";

/// Argument carrying the unique run token.
pub const RUN_ID_ARG: &str = "run.id";

/// Errors that stop a step before it reaches the task subsystem.
#[derive(Debug, Clone, Error)]
pub enum UnitError {
    /// The run was told to stop waiting before this step launched.
    #[error("run cancelled before launch")]
    Cancelled,

    /// The run is shutting down; no new tasks are launched.
    #[error("shutdown in progress")]
    ShuttingDown,

    /// The platform has no free execution slot.
    #[error("platform '{platform}' is at capacity ({maximum} concurrent executions)")]
    CapacityExceeded { platform: String, maximum: u32 },

    /// The admission check itself failed.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The request is invalid or the launcher refused it.
    #[error("launch rejected: {0}")]
    LaunchRejected(String),
}

impl From<UnitError> for FailureReason {
    fn from(err: UnitError) -> Self {
        match err {
            UnitError::Cancelled => FailureReason::Cancelled,
            UnitError::ShuttingDown => FailureReason::ShutdownInProgress,
            UnitError::CapacityExceeded { platform, maximum } => {
                FailureReason::CapacityExceeded { platform, maximum }
            }
            UnitError::Admission(AdmissionError::Launcher(e)) => FailureReason::LaunchRejected {
                message: e.to_string(),
            },
            UnitError::Admission(e) => FailureReason::UnknownPlatform {
                message: e.to_string(),
            },
            UnitError::LaunchRejected(message) => FailureReason::LaunchRejected { message },
        }
    }
}

/// Launches one step and waits for its verdict.
pub struct ExecutionUnit {
    config: Arc<ComposedTaskConfig>,
    admission: AdmissionController,
    launcher: Arc<dyn TaskLauncher>,
    poller: CompletionPoller,
    policy: PollPolicy,
}

impl ExecutionUnit {
    pub fn new(
        config: Arc<ComposedTaskConfig>,
        launcher: Arc<dyn TaskLauncher>,
        explorer: Arc<dyn TaskExplorer>,
    ) -> Self {
        let policy = PollPolicy::from_config(&config);
        Self {
            admission: AdmissionController::new(Arc::clone(&launcher)),
            poller: CompletionPoller::new(explorer),
            launcher,
            policy,
            config,
        }
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Assemble the launch request for a step.
    ///
    /// Arguments: the step's own, then configured per-step ones, then the
    /// parent execution id and the run token when enabled. Properties: the
    /// step's own, then configured per-step ones, then the platform name.
    pub fn build_request(&self, directive: &LaunchDirective, ctx: &RunContext) -> LaunchRequest {
        let key = directive.config_key();
        let mut request = LaunchRequest::new(&directive.task_name, &self.config.platform_name);

        request.arguments.extend(directive.arguments.iter().cloned());
        request
            .arguments
            .extend(self.config.arguments_for_step(key).iter().cloned());

        if let Some(parent) = self.config.parent_execution_id {
            let stale = format!("--{}=", PARENT_EXECUTION_ID_ARG);
            request.arguments.retain(|arg| !arg.starts_with(&stale));
            request
                .arguments
                .push(format!("--{}={}", PARENT_EXECUTION_ID_ARG, parent));
        }
        if self.config.uuid_instance_enabled {
            request.arguments.push(format!("--{}={}", RUN_ID_ARG, ctx.run_id));
        }

        request.properties.extend(directive.properties.clone());
        request.properties.extend(self.config.properties_for_step(key));
        request
            .properties
            .entry(PLATFORM_NAME_PROPERTY.to_string())
            .or_insert_with(|| self.config.platform_name.clone());

        request
    }

    /// Reject requests the launcher must never see.
    pub fn validate_request(&self, request: &LaunchRequest) -> Result<(), UnitError> {
        if request.task_name.trim().is_empty() {
            return Err(UnitError::LaunchRejected("task name must not be empty".into()));
        }
        if let Some(platform) = request.properties.get(PLATFORM_NAME_PROPERTY)
            && platform != &self.config.platform_name
        {
            return Err(UnitError::LaunchRejected(format!(
                "'{}' property '{}' does not match the configured platform '{}'",
                PLATFORM_NAME_PROPERTY, platform, self.config.platform_name
            )));
        }
        Ok(())
    }

    /// Admit, validate and launch a step without waiting for it.
    pub async fn launch(
        &self,
        directive: &LaunchDirective,
        ctx: &RunContext,
    ) -> Result<ExecutionId, UnitError> {
        if ctx.is_shutting_down() {
            return Err(UnitError::ShuttingDown);
        }
        if ctx.cancel.is_cancelled() {
            return Err(UnitError::Cancelled);
        }

        let platform = &self.config.platform_name;
        let capacity = self.admission.capacity(platform).await?;
        if !capacity.has_capacity() {
            return Err(UnitError::CapacityExceeded {
                platform: platform.clone(),
                maximum: capacity.maximum_task_executions,
            });
        }

        let request = self.build_request(directive, ctx);
        self.validate_request(&request)?;

        debug!(
            step = %directive.step,
            task = %request.task_name,
            arguments = ?request.arguments,
            "launching step"
        );
        self.launcher
            .launch(&request)
            .await
            .map_err(|e| UnitError::LaunchRejected(e.to_string()))
    }

    /// Run a step to a terminal outcome. Never panics on task failure.
    pub async fn run(&self, directive: &LaunchDirective, ctx: &RunContext) -> ExecutionOutcome {
        let start = Instant::now();
        let step = directive.step.clone();

        let id = match self.launch(directive, ctx).await {
            Ok(id) => id,
            Err(e) => {
                warn!(step = %step, error = %e, "step was not launched");
                let reason = FailureReason::from(e);
                ctx.emit(Event::step_failed(ctx.run_id, step.clone(), None, reason.clone()))
                    .await;
                return ExecutionOutcome::failed(step, reason, start.elapsed());
            }
        };

        info!(step = %step, execution_id = %id, "step launched");
        ctx.emit(Event::step_launched(
            ctx.run_id,
            step.clone(),
            &directive.task_name,
            id,
        ))
        .await;

        let result = self.poller.await_terminal(id, &self.policy, &ctx.cancel).await;
        let reason = match (result.state, result.exit_code()) {
            (PollState::Terminal, Some(0)) => None,
            (PollState::Terminal, Some(code)) => Some(FailureReason::NonZeroExit { code }),
            (PollState::Terminal, None) => Some(FailureReason::MissingExitCode),
            (PollState::TimedOut, _) => {
                warn!(
                    step = %step,
                    execution_id = %id,
                    waited = ?self.policy.max_wait,
                    "step did not complete in time; the task itself is left running"
                );
                Some(FailureReason::Timeout {
                    waited: self.policy.max_wait,
                })
            }
            (PollState::StartTimedOut, _) => {
                warn!(
                    step = %step,
                    execution_id = %id,
                    waited = ?self.policy.max_start_wait,
                    "step did not start in time"
                );
                Some(FailureReason::StartTimeout {
                    waited: self.policy.max_start_wait,
                })
            }
            (PollState::Cancelled, _) => {
                warn!(step = %step, execution_id = %id, "stopped waiting for step");
                Some(FailureReason::Cancelled)
            }
        };

        let duration = start.elapsed();
        match reason {
            None => {
                info!(step = %step, execution_id = %id, "step succeeded");
                ctx.emit(Event::step_completed(ctx.run_id, step.clone(), id, duration))
                    .await;
                ExecutionOutcome::succeeded(step, duration).with_execution_id(id)
            }
            Some(reason) => {
                warn!(step = %step, execution_id = %id, reason = %reason, "step failed");
                ctx.emit(Event::step_failed(
                    ctx.run_id,
                    step.clone(),
                    Some(id),
                    reason.clone(),
                ))
                .await;
                ExecutionOutcome::failed(step, reason, duration).with_execution_id(id)
            }
        }
    }
}
