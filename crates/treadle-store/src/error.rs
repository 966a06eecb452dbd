//! Error types for store operations.

use thiserror::Error;
use treadle_types::{ObjectKey, TypesError};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No workflow exists under this key.
    #[error("Workflow not found: {0}")]
    NotFound(ObjectKey),

    /// The write was based on a stale read.
    #[error("Conflict writing {key}: expected version {expected}, stored version {actual}")]
    Conflict {
        key: ObjectKey,
        expected: String,
        actual: String,
    },

    /// The object violates the store's typed-object contract.
    #[error("Invalid object {key}: {reason}")]
    InvalidObject { key: ObjectKey, reason: String },

    /// A mutation was rejected by the model.
    #[error(transparent)]
    Model(#[from] TypesError),

    /// The change feed could not be established.
    #[error("Watch failed: {0}")]
    Watch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
