//! In-order execution of sequence children.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::context::RunContext;
use super::runner::Engine;
use crate::core::outcome::{ExecutionOutcome, FailureReason};
use crate::core::plan::SequencePlan;

/// Why no further child may start, if the run has been told to stop.
fn stop_reason(ctx: &RunContext) -> Option<FailureReason> {
    if ctx.is_shutting_down() {
        Some(FailureReason::ShutdownInProgress)
    } else if ctx.cancel.is_cancelled() {
        Some(FailureReason::Cancelled)
    } else {
        None
    }
}

/// Runs sequence children one after another.
///
/// Stops at the first failed child unless `continue_on_failure` is set, in
/// which case every child runs and the sequence still fails if any did.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceRunner {
    continue_on_failure: bool,
}

impl SequenceRunner {
    pub fn new(continue_on_failure: bool) -> Self {
        Self {
            continue_on_failure,
        }
    }

    pub(crate) async fn run(
        &self,
        engine: &Arc<Engine>,
        sequence: &SequencePlan,
        ctx: &RunContext,
    ) -> ExecutionOutcome {
        let start = Instant::now();
        let mut children = Vec::with_capacity(sequence.entries.len());

        for entry in &sequence.entries {
            if let Some(reason) = stop_reason(ctx) {
                debug!(
                    sequence = %sequence.node,
                    next = %entry.node(),
                    reason = %reason,
                    "not starting next child"
                );
                let node = entry.node().clone();
                children.push(ExecutionOutcome::failed(node, reason, Duration::ZERO));
                break;
            }

            let outcome = engine.run_entry(entry, ctx).await;
            let failed = outcome.is_failed();
            children.push(outcome);

            if failed && !self.continue_on_failure {
                debug!(
                    sequence = %sequence.node,
                    failed = %entry.node(),
                    "stopping sequence after failure"
                );
                break;
            }
        }

        ExecutionOutcome::aggregate(sequence.node.clone(), children, start.elapsed())
    }
}
