//! Pre-launch capacity checks.
//!
//! Platform configuration lives on the launcher side and can change between
//! calls, so every check reads a fresh snapshot. Nothing is cached.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::launcher::{LauncherError, PlatformCapacitySnapshot, TaskLauncher};

/// Errors raised while checking platform admission.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// The configured platform is not among those the launcher reports.
    #[error("platform '{platform}' is not configured; available platforms: [{}]", .available.join(", "))]
    UnknownPlatform {
        platform: String,
        available: Vec<String>,
    },

    /// The launcher reports no platforms at all.
    #[error("no task platforms are configured on the launcher")]
    NoPlatforms,

    /// The launcher could not be queried.
    #[error(transparent)]
    Launcher(#[from] LauncherError),
}

/// Decides whether a platform can take another task.
pub struct AdmissionController {
    launcher: Arc<dyn TaskLauncher>,
}

impl AdmissionController {
    pub fn new(launcher: Arc<dyn TaskLauncher>) -> Self {
        Self { launcher }
    }

    /// Whether `platform` is below its concurrent-execution limit right now.
    pub async fn is_accepting_new_tasks(&self, platform: &str) -> Result<bool, AdmissionError> {
        Ok(self.capacity(platform).await?.has_capacity())
    }

    /// Fresh capacity snapshot for `platform`.
    pub async fn capacity(
        &self,
        platform: &str,
    ) -> Result<PlatformCapacitySnapshot, AdmissionError> {
        let snapshots = self.launcher.current_executions().await?;
        if snapshots.is_empty() {
            return Err(AdmissionError::NoPlatforms);
        }

        let available: Vec<String> = snapshots.iter().map(|s| s.name.clone()).collect();
        let snapshot = snapshots
            .into_iter()
            .find(|s| s.name == platform)
            .ok_or_else(|| AdmissionError::UnknownPlatform {
                platform: platform.to_string(),
                available,
            })?;

        if snapshot.has_capacity() {
            debug!(
                platform = %platform,
                running = snapshot.running_execution_count,
                maximum = snapshot.maximum_task_executions,
                "platform has capacity"
            );
        } else {
            warn!(
                platform = %platform,
                running = snapshot.running_execution_count,
                maximum = snapshot.maximum_task_executions,
                "platform is at its concurrent task execution limit"
            );
        }
        Ok(snapshot)
    }

    /// Check that `platform` exists. Run once before any launch so that a
    /// misconfigured platform fails at startup.
    pub async fn verify_platform(&self, platform: &str) -> Result<(), AdmissionError> {
        let platforms = self.launcher.list_platforms().await?;
        if platforms.is_empty() {
            return Err(AdmissionError::NoPlatforms);
        }
        if platforms.iter().any(|p| p.name == platform) {
            return Ok(());
        }
        Err(AdmissionError::UnknownPlatform {
            platform: platform.to_string(),
            available: platforms.into_iter().map(|p| p.name).collect(),
        })
    }
}
