//! Configuration loading and parsing.
//!
//! This module provides YAML-based composed-task definitions and the run
//! configuration the engine consumes.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    ComposedTaskConfig, ComposedTaskDefinition, DEFAULT_INTERVAL_BETWEEN_CHECKS_MS,
    DEFAULT_PLATFORM_NAME, DEFAULT_SPLIT_CORE_POOL_SIZE, DEFAULT_SPLIT_KEEP_ALIVE_SECS,
    LocalPlatformConfig, SplitPoolConfig,
};
pub use yaml::{YamlLoader, load_definitions_from_directory};
