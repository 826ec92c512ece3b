//! Core types: graph nodes, compiled plans and outcomes.

pub mod graph;
pub mod outcome;
pub mod plan;
pub mod types;
