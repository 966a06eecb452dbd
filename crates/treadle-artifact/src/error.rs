//! Error types for artifact transfer.

use thiserror::Error;

/// Result type for artifact operations.
pub type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },

    /// The presented credentials do not match the instance.
    #[error("Access denied to artifact store at {0}")]
    Unauthorized(String),

    #[error("Artifact store not reachable at {0}")]
    Unreachable(String),

    #[error("Invalid bucket or object name: '{0}'")]
    InvalidName(String),

    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
