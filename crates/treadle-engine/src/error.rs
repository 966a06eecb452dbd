//! Error types for the engine.

use std::time::Duration;

use thiserror::Error;
use treadle_artifact::ArtifactError;
use treadle_launcher::LauncherError;
use treadle_store::StoreError;
use treadle_types::TypesError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Launcher(#[from] LauncherError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Model(#[from] TypesError),

    /// The informer cache did not finish its initial list in time.
    #[error("Cache did not sync within {0:?}")]
    SyncTimeout(Duration),

    /// The store's change feed ended while the controller was running.
    #[error("Workflow change feed closed")]
    FeedClosed,

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
