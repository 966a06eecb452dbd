//! Error types for launcher operations.

use thiserror::Error;
use treadle_artifact::ArtifactError;
use treadle_types::ObjectKey;

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LauncherError>;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("Schedule already exists: {0}")]
    ScheduleExists(ObjectKey),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(ObjectKey),

    #[error("Execution unit already exists: {0}")]
    UnitExists(ObjectKey),

    #[error("Execution unit not found: {0}")]
    UnitNotFound(ObjectKey),

    #[error("Failed to start execution unit {unit}: {source}")]
    Spawn {
        unit: ObjectKey,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact instance error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LauncherError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LauncherError::ScheduleNotFound(_) | LauncherError::UnitNotFound(_)
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            LauncherError::ScheduleExists(_) | LauncherError::UnitExists(_)
        )
    }
}
