//! composer - Orchestration engine for composed tasks.
//!
//! A composed task is a graph of task launches arranged in sequences and
//! parallel splits. The graph is compiled into an immutable plan, then run
//! against an external launcher that starts each task and reports its state.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod launcher;
pub mod testing;

pub use config::{
    ComposedTaskConfig, ComposedTaskDefinition, ConfigError, SplitPoolConfig, YamlLoader,
    load_definitions_from_directory,
};
pub use crate::core::graph::GraphNode;
pub use crate::core::outcome::{ExecutionOutcome, FailureReason, OutcomeStatus};
pub use crate::core::plan::{
    ExecutionPlan, LaunchDirective, MalformedGraphError, PlanEntry, compile,
};
pub use crate::core::types::{ExecutionId, NodeRef, RunId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    AdmissionController, AdmissionError, CompletionPoller, ComposedTaskRunner, ExecutionUnit,
    PollPolicy, PollState, RunContext, RunReport, RunnerError, UnitError,
};
pub use launcher::{
    AppRegistration, LaunchRequest, LauncherError, LocalTaskLauncher, TaskExecutionHandle,
    TaskExplorer, TaskLauncher,
};
