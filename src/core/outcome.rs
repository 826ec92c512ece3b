//! Terminal verdicts for plan nodes.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use super::types::{ExecutionId, NodeRef};

/// Terminal status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
}

/// Why a node failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("platform '{platform}' is at capacity ({maximum} concurrent executions)")]
    CapacityExceeded { platform: String, maximum: u32 },

    #[error("{message}")]
    UnknownPlatform { message: String },

    #[error("launch rejected: {message}")]
    LaunchRejected { message: String },

    #[error("task exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("task ended without an exit code")]
    MissingExitCode,

    #[error("task did not start within {waited:?}")]
    StartTimeout { waited: Duration },

    #[error("task did not complete within {waited:?}")]
    Timeout { waited: Duration },

    #[error("stopped waiting for the task (cancelled)")]
    Cancelled,

    #[error("split worker pool rejected the branch")]
    PoolRejected,

    #[error("not started: shutdown in progress")]
    ShutdownInProgress,

    #[error("branch worker terminated unexpectedly: {message}")]
    WorkerLost { message: String },

    #[error("{failed} of {total} children failed")]
    ChildrenFailed { failed: usize, total: usize },
}

/// Terminal verdict for one node of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    /// Node the outcome belongs to.
    pub node: NodeRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Set for launch steps that reached the launcher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Outcomes of evaluated children, for sequences and splits.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExecutionOutcome>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

impl ExecutionOutcome {
    pub fn succeeded(node: NodeRef, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::Succeeded,
            node,
            reason: None,
            execution_id: None,
            duration,
            children: Vec::new(),
        }
    }

    pub fn failed(node: NodeRef, reason: FailureReason, duration: Duration) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            node,
            reason: Some(reason),
            execution_id: None,
            duration,
            children: Vec::new(),
        }
    }

    /// Fold child outcomes into a container outcome: FAILED iff any child failed.
    pub fn aggregate(node: NodeRef, children: Vec<ExecutionOutcome>, duration: Duration) -> Self {
        let failed = children.iter().filter(|c| c.is_failed()).count();
        let mut outcome = if failed == 0 {
            Self::succeeded(node, duration)
        } else {
            Self::failed(
                node,
                FailureReason::ChildrenFailed {
                    failed,
                    total: children.len(),
                },
                duration,
            )
        };
        outcome.children = children;
        outcome
    }

    pub fn with_execution_id(mut self, id: ExecutionId) -> Self {
        self.execution_id = Some(id);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }

    /// Find the outcome of a node anywhere in this subtree.
    pub fn find(&self, node: &str) -> Option<&ExecutionOutcome> {
        if self.node.as_str() == node {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(node))
    }

    /// Launch-step outcomes in this subtree that failed.
    pub fn failed_steps(&self) -> Vec<&ExecutionOutcome> {
        let mut out = Vec::new();
        self.walk_leaves(&mut |o| {
            if o.is_failed() {
                out.push(o);
            }
        });
        out
    }

    /// Number of leaf outcomes in this subtree.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.walk_leaves(&mut |_| count += 1);
        count
    }

    fn walk_leaves<'a>(&'a self, f: &mut dyn FnMut(&'a ExecutionOutcome)) {
        if self.children.is_empty() {
            f(self);
        } else {
            self.children.iter().for_each(|c| c.walk_leaves(f));
        }
    }
}
