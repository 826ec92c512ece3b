//! Completion polling for launched tasks.
//!
//! The poller sleeps, queries the task subsystem, and repeats until the
//! execution has an end time or a wait budget runs out. Each sleep is raced
//! against a cancellation token so a shutdown never leaves a loop behind.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ComposedTaskConfig;
use crate::core::types::ExecutionId;
use crate::launcher::{TaskExecutionHandle, TaskExplorer};

/// Timing of a poll loop. A zero budget means no bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
    pub max_start_wait: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: Duration::ZERO,
            max_start_wait: Duration::ZERO,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_max_start_wait(mut self, max_start_wait: Duration) -> Self {
        self.max_start_wait = max_start_wait;
        self
    }

    pub fn from_config(config: &ComposedTaskConfig) -> Self {
        Self::new(config.interval_between_checks())
            .with_max_wait(config.max_wait_time())
            .with_max_start_wait(config.max_start_wait_time())
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// The execution has an end time.
    Terminal,
    /// `max_wait` elapsed before the execution ended.
    TimedOut,
    /// `max_start_wait` elapsed before the execution reported a start time.
    StartTimedOut,
    /// The cancellation token fired.
    Cancelled,
}

/// Result of [`CompletionPoller::await_terminal`].
#[derive(Debug, Clone)]
pub struct PollResult {
    /// Last state observed, if the execution was ever visible.
    pub handle: Option<TaskExecutionHandle>,
    pub state: PollState,
    /// Number of queries made.
    pub checks: u32,
    pub elapsed: Duration,
}

impl PollResult {
    pub fn exit_code(&self) -> Option<i32> {
        self.handle.as_ref().and_then(|h| h.exit_code)
    }
}

/// Waits for launched executions to finish.
pub struct CompletionPoller {
    explorer: Arc<dyn TaskExplorer>,
}

impl CompletionPoller {
    pub fn new(explorer: Arc<dyn TaskExplorer>) -> Self {
        Self { explorer }
    }

    /// Poll `id` until it is terminal, a budget runs out, or `cancel` fires.
    ///
    /// Giving up never cancels the external task.
    pub async fn await_terminal(
        &self,
        id: ExecutionId,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> PollResult {
        let started = Instant::now();
        let mut latest: Option<TaskExecutionHandle> = None;
        let mut checks = 0u32;

        let finish = |latest: Option<TaskExecutionHandle>, state, checks| PollResult {
            handle: latest,
            state,
            checks,
            elapsed: started.elapsed(),
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(execution_id = %id, checks, "stopped polling: cancelled");
                    return finish(latest, PollState::Cancelled, checks);
                }
                _ = tokio::time::sleep(policy.interval) => {}
            }

            checks += 1;
            match self.explorer.get_execution(id).await {
                Ok(Some(handle)) => latest = Some(handle),
                Ok(None) => debug!(execution_id = %id, "execution not visible yet"),
                Err(e) => warn!(execution_id = %id, error = %e, "failed to query execution state"),
            }

            if latest.as_ref().is_some_and(TaskExecutionHandle::is_terminal) {
                return finish(latest, PollState::Terminal, checks);
            }

            let elapsed = started.elapsed();
            let started_running = latest.as_ref().is_some_and(TaskExecutionHandle::is_started);
            if !started_running
                && !policy.max_start_wait.is_zero()
                && elapsed >= policy.max_start_wait
            {
                return finish(latest, PollState::StartTimedOut, checks);
            }
            if !policy.max_wait.is_zero() && elapsed >= policy.max_wait {
                return finish(latest, PollState::TimedOut, checks);
            }
        }
    }
}
