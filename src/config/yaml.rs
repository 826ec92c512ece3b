//! YAML definition parsing.
//!
//! Parses composed-task definitions and standalone run configuration from
//! YAML files.

use std::path::Path;

use super::error::ConfigError;
use super::types::{ComposedTaskConfig, ComposedTaskDefinition};
use crate::core::plan::compile;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a composed-task definition from a file.
    pub fn load_definition(path: impl AsRef<Path>) -> Result<ComposedTaskDefinition, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let definition: ComposedTaskDefinition =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_definition(&definition)?;
        Ok(definition)
    }

    /// Parse a composed-task definition from a YAML string.
    pub fn parse_definition(yaml: &str) -> Result<ComposedTaskDefinition, ConfigError> {
        let definition: ComposedTaskDefinition = serde_yaml::from_str(yaml)?;
        Self::validate_definition(&definition)?;
        Ok(definition)
    }

    /// Load run configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<ComposedTaskConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_config(&content)
    }

    /// Parse run configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<ComposedTaskConfig, ConfigError> {
        let config: ComposedTaskConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate a definition: name, configuration values and graph shape.
    fn validate_definition(definition: &ComposedTaskDefinition) -> Result<(), ConfigError> {
        if definition.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        definition.config.validate()?;
        compile(&definition.graph)?;

        if definition.local.maximum_task_executions == 0 {
            return Err(ConfigError::invalid(
                "local.maximum_task_executions",
                "must be greater than zero",
            ));
        }
        for (name, app) in &definition.apps {
            if app.command.trim().is_empty() {
                return Err(ConfigError::invalid(format!("apps.{}.command", name), "is empty"));
            }
        }
        Ok(())
    }
}

/// Load every `.yaml`/`.yml` definition in a directory.
pub fn load_definitions_from_directory(
    dir: impl AsRef<Path>,
) -> Result<Vec<ComposedTaskDefinition>, ConfigError> {
    let dir = dir.as_ref();
    let read_dir_error = |source| ConfigError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir_error)? {
        let path = entry.map_err(read_dir_error)?.path();
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    paths.iter().map(YamlLoader::load_definition).collect()
}
