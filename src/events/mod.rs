//! Lifecycle events and event handling.
//!
//! This module provides event emission for run, step and split lifecycle
//! events, enabling observability into composed-task execution.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::outcome::FailureReason;
use crate::core::types::{ExecutionId, NodeRef, RunId};

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A composed-task run has started.
    RunStarted {
        run_id: RunId,
        name: String,
        timestamp: Instant,
    },

    /// A composed-task run finished (successfully or with failures).
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// A step was accepted by the launcher.
    StepLaunched {
        run_id: RunId,
        step: NodeRef,
        task_name: String,
        execution_id: ExecutionId,
        timestamp: Instant,
    },

    /// A step reached a terminal state with exit code 0.
    StepCompleted {
        run_id: RunId,
        step: NodeRef,
        execution_id: ExecutionId,
        duration: Duration,
        timestamp: Instant,
    },

    /// A step failed, before or after launch.
    StepFailed {
        run_id: RunId,
        step: NodeRef,
        /// Absent when the step never reached the launcher.
        execution_id: Option<ExecutionId>,
        reason: FailureReason,
        timestamp: Instant,
    },

    /// A split submitted its branches.
    SplitStarted {
        run_id: RunId,
        split: NodeRef,
        branches: usize,
        timestamp: Instant,
    },

    /// Every branch of a split has an outcome.
    SplitCompleted {
        run_id: RunId,
        split: NodeRef,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. } => *timestamp,
            Event::RunCompleted { timestamp, .. } => *timestamp,
            Event::StepLaunched { timestamp, .. } => *timestamp,
            Event::StepCompleted { timestamp, .. } => *timestamp,
            Event::StepFailed { timestamp, .. } => *timestamp,
            Event::SplitStarted { timestamp, .. } => *timestamp,
            Event::SplitCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Step the event is about, if any.
    pub fn step(&self) -> Option<&NodeRef> {
        match self {
            Event::StepLaunched { step, .. }
            | Event::StepCompleted { step, .. }
            | Event::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    pub fn run_started(run_id: RunId, name: impl Into<String>) -> Self {
        Event::RunStarted {
            run_id,
            name: name.into(),
            timestamp: Instant::now(),
        }
    }

    pub fn run_completed(run_id: RunId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            run_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    pub fn step_launched(
        run_id: RunId,
        step: NodeRef,
        task_name: impl Into<String>,
        execution_id: ExecutionId,
    ) -> Self {
        Event::StepLaunched {
            run_id,
            step,
            task_name: task_name.into(),
            execution_id,
            timestamp: Instant::now(),
        }
    }

    pub fn step_completed(
        run_id: RunId,
        step: NodeRef,
        execution_id: ExecutionId,
        duration: Duration,
    ) -> Self {
        Event::StepCompleted {
            run_id,
            step,
            execution_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    pub fn step_failed(
        run_id: RunId,
        step: NodeRef,
        execution_id: Option<ExecutionId>,
        reason: FailureReason,
    ) -> Self {
        Event::StepFailed {
            run_id,
            step,
            execution_id,
            reason,
            timestamp: Instant::now(),
        }
    }

    pub fn split_started(run_id: RunId, split: NodeRef, branches: usize) -> Self {
        Event::SplitStarted {
            run_id,
            split,
            branches,
            timestamp: Instant::now(),
        }
    }

    pub fn split_completed(
        run_id: RunId,
        split: NodeRef,
        success: bool,
        duration: Duration,
    ) -> Self {
        Event::SplitCompleted {
            run_id,
            split,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
