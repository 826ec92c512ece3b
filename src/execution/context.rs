//! Per-run state shared by every component of one composed-task run.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::types::RunId;
use crate::events::{Event, EventBus};

/// Identity and signals of one composed-task run.
///
/// Two tokens drive shutdown. `shutdown` stops the engine from starting new
/// work: sequences stop before their next child and split pools refuse new
/// branches. `cancel` abandons waiting on tasks that are already launched; the
/// external tasks themselves keep running.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub shutdown: CancellationToken,
    pub cancel: CancellationToken,
    pub events: Option<Arc<EventBus>>,
}

impl RunContext {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            shutdown: CancellationToken::new(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Publish an event if a bus is attached.
    pub async fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.emit(event).await;
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("shutdown", &self.shutdown.is_cancelled())
            .field("cancel", &self.cancel.is_cancelled())
            .field("events", &self.events.is_some())
            .finish()
    }
}
