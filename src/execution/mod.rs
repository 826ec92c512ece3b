//! Composed-task execution engine.
//!
//! This module provides the components that run a compiled plan: admission
//! checks, single-step execution, completion polling, sequences, splits and
//! the runner that drives them.

mod admission;
mod context;
mod poller;
mod runner;
mod sequence;
mod split;
mod unit;

pub use admission::{AdmissionController, AdmissionError};
pub use context::RunContext;
pub use poller::{CompletionPoller, PollPolicy, PollResult, PollState};
pub use runner::{ComposedTaskRunner, RunReport, RunnerError};
pub use sequence::SequenceRunner;
pub use split::{SplitCoordinator, SplitPool, WorkerSlot, WorkerTicket};
pub use unit::{ExecutionUnit, PARENT_EXECUTION_ID_ARG, RUN_ID_ARG, UnitError};
