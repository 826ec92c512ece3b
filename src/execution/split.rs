//! Concurrent execution of split branches.
//!
//! Every split gets its own [`SplitPool`]. Branches are all submitted before
//! any is awaited, each runs on its own tokio task, and the split finishes
//! only when every branch has an outcome. A failed branch never cancels its
//! siblings. Branch tasks live in a [`JoinSet`], so dropping a running split
//! aborts them along with their poll loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use super::context::RunContext;
use super::runner::Engine;
use crate::config::SplitPoolConfig;
use crate::core::outcome::{ExecutionOutcome, FailureReason};
use crate::core::plan::SplitPlan;
use crate::events::Event;

/// Worker pool owned by one split.
///
/// `keep_alive` and `allow_core_thread_timeout` are accepted for
/// configuration compatibility; branch workers are tokio tasks that end with
/// their branch, so there is nothing idle to retire.
pub struct SplitPool {
    config: SplitPoolConfig,
    core: Arc<Semaphore>,
    /// Overflow workers passed on to queued branches when they finish.
    handoff: Semaphore,
    queued: AtomicUsize,
    overflow: AtomicUsize,
    shutdown: CancellationToken,
}

enum Ticket {
    Core(OwnedSemaphorePermit),
    Queued,
    Overflow,
}

/// A branch accepted by the pool, not yet running.
pub struct WorkerTicket {
    pool: Arc<SplitPool>,
    ticket: Ticket,
}

/// A running branch's worker. Releases its slot when dropped.
pub struct WorkerSlot {
    pool: Arc<SplitPool>,
    _permit: Option<OwnedSemaphorePermit>,
    overflow: bool,
}

impl SplitPool {
    pub fn new(config: SplitPoolConfig, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(Semaphore::new(config.effective_core_size())),
            handoff: Semaphore::new(0),
            queued: AtomicUsize::new(0),
            overflow: AtomicUsize::new(0),
            config,
            shutdown,
        })
    }

    pub fn config(&self) -> &SplitPoolConfig {
        &self.config
    }

    /// Branches waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Workers running beyond the core size.
    pub fn overflow_workers(&self) -> usize {
        self.overflow.load(Ordering::SeqCst)
    }

    /// Accept a branch: run on a free core worker, else queue, else add an
    /// overflow worker up to the max size, else reject.
    pub fn submit(self: &Arc<Self>) -> Result<WorkerTicket, FailureReason> {
        if self.shutdown.is_cancelled() {
            return Err(FailureReason::ShutdownInProgress);
        }

        let ticket = if let Ok(permit) = Arc::clone(&self.core).try_acquire_owned() {
            Ticket::Core(permit)
        } else if self
            .config
            .queue_capacity
            .is_none_or(|capacity| self.queued() < capacity)
        {
            self.queued.fetch_add(1, Ordering::SeqCst);
            Ticket::Queued
        } else if self.config.max_pool_size.is_none_or(|max| {
            self.config.effective_core_size() + self.overflow_workers() < max
        }) {
            self.overflow.fetch_add(1, Ordering::SeqCst);
            Ticket::Overflow
        } else {
            return Err(FailureReason::PoolRejected);
        };

        Ok(WorkerTicket {
            pool: Arc::clone(self),
            ticket,
        })
    }
}

impl WorkerTicket {
    /// Wait for a worker.
    ///
    /// A queued branch takes the first core worker or finished overflow
    /// worker to come free. It gives up when `cancel` fires, and on shutdown
    /// unless the pool waits for submitted tasks to complete.
    pub async fn ready(self, cancel: &CancellationToken) -> Result<WorkerSlot, FailureReason> {
        let pool = self.pool;
        match self.ticket {
            Ticket::Core(permit) => Ok(WorkerSlot {
                pool,
                _permit: Some(permit),
                overflow: false,
            }),
            Ticket::Overflow => Ok(WorkerSlot {
                pool,
                _permit: None,
                overflow: true,
            }),
            Ticket::Queued => {
                let core = Arc::clone(&pool.core);
                let drain_on_shutdown = !pool.config.wait_for_tasks_to_complete_on_shutdown;
                // Pool semaphores are never closed.
                let acquired = tokio::select! {
                    biased;
                    _ = pool.shutdown.cancelled(), if drain_on_shutdown => {
                        Err(FailureReason::ShutdownInProgress)
                    }
                    _ = cancel.cancelled() => Err(FailureReason::Cancelled),
                    permit = core.acquire_owned() => {
                        permit.map(Some).map_err(|_| FailureReason::ShutdownInProgress)
                    }
                    permit = pool.handoff.acquire() => permit
                        .map(|permit| permit.forget())
                        .map(|()| None)
                        .map_err(|_| FailureReason::ShutdownInProgress),
                };
                pool.queued.fetch_sub(1, Ordering::SeqCst);

                let permit = acquired?;
                let overflow = permit.is_none();
                if overflow {
                    pool.overflow.fetch_add(1, Ordering::SeqCst);
                }
                Ok(WorkerSlot {
                    pool,
                    _permit: permit,
                    overflow,
                })
            }
        }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if self.overflow {
            self.pool.overflow.fetch_sub(1, Ordering::SeqCst);
            if self.pool.queued() > 0 {
                self.pool.handoff.add_permits(1);
            }
        }
    }
}

/// Runs split branches concurrently.
pub struct SplitCoordinator {
    pool_config: SplitPoolConfig,
}

impl SplitCoordinator {
    pub fn new(pool_config: SplitPoolConfig) -> Self {
        Self { pool_config }
    }

    /// Run every branch of `split` and fold the branch outcomes.
    pub(crate) async fn run(
        &self,
        engine: &Arc<Engine>,
        split: &SplitPlan,
        ctx: &RunContext,
    ) -> ExecutionOutcome {
        let start = Instant::now();
        let pool = SplitPool::new(self.pool_config.clone(), ctx.shutdown.clone());
        let wait_on_shutdown = self.pool_config.wait_for_tasks_to_complete_on_shutdown;

        let branch_cancel = ctx.cancel.child_token();
        let branch_ctx = ctx.clone().with_cancel(branch_cancel.clone());

        debug!(
            split = %split.node,
            branches = split.branches.len(),
            core_pool_size = self.pool_config.core_pool_size,
            "submitting split branches"
        );
        ctx.emit(Event::split_started(
            ctx.run_id,
            split.node.clone(),
            split.branches.len(),
        ))
        .await;

        let mut outcomes: Vec<Option<ExecutionOutcome>> = vec![None; split.branches.len()];
        let mut running = JoinSet::new();
        for (index, branch) in split.branches.iter().enumerate() {
            let node = branch.node().clone();
            let ticket = match pool.submit() {
                Ok(ticket) => ticket,
                Err(reason) => {
                    warn!(
                        split = %split.node,
                        branch = %node,
                        reason = %reason,
                        "branch not submitted"
                    );
                    outcomes[index] = Some(ExecutionOutcome::failed(node, reason, start.elapsed()));
                    continue;
                }
            };

            let engine = Arc::clone(engine);
            let branch = Arc::clone(branch);
            let ctx = branch_ctx.clone();
            let span = info_span!("split_branch", split = %split.node, branch = %node);
            running.spawn(
                async move {
                    let queued_at = Instant::now();
                    let outcome = match ticket.ready(&ctx.cancel).await {
                        Ok(_slot) => engine.run_entry(&branch, &ctx).await,
                        Err(reason) => ExecutionOutcome::failed(
                            branch.node().clone(),
                            reason,
                            queued_at.elapsed(),
                        ),
                    };
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        let mut lost = Vec::new();
        let mut abandoning = false;
        loop {
            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                    Some(Err(e)) => {
                        warn!(split = %split.node, error = %e, "branch worker lost");
                        lost.push(e.to_string());
                    }
                    None => break,
                },
                _ = ctx.shutdown.cancelled(), if !wait_on_shutdown && !abandoning => {
                    warn!(split = %split.node, "shutdown requested; abandoning in-flight branches");
                    abandoning = true;
                    branch_cancel.cancel();
                }
            }
        }

        let mut lost = lost.into_iter();
        let children: Vec<ExecutionOutcome> = outcomes
            .into_iter()
            .zip(&split.branches)
            .map(|(outcome, branch)| {
                outcome.unwrap_or_else(|| {
                    let message = lost
                        .next()
                        .unwrap_or_else(|| "branch ended without an outcome".to_string());
                    ExecutionOutcome::failed(
                        branch.node().clone(),
                        FailureReason::WorkerLost { message },
                        start.elapsed(),
                    )
                })
            })
            .collect();

        let outcome = ExecutionOutcome::aggregate(split.node.clone(), children, start.elapsed());
        debug!(
            split = %split.node,
            success = outcome.is_success(),
            duration_ms = %outcome.duration.as_millis(),
            "split completed"
        );
        ctx.emit(Event::split_completed(
            ctx.run_id,
            split.node.clone(),
            outcome.is_success(),
            outcome.duration,
        ))
        .await;
        outcome
    }
}
