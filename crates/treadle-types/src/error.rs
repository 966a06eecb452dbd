//! Error types for model validation.

use thiserror::Error;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors raised while validating or interpreting workflow objects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    /// The workflow definition is malformed.
    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    /// A cron expression could not be parsed.
    #[error("Invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    /// An object key was not of the form `namespace/name`.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// A run ID does not address an entry in the run ledger.
    #[error("Run {run_id} not found in workflow '{workflow}'")]
    RunNotFound { workflow: String, run_id: u32 },

    /// A task index is outside the declared task list.
    #[error("Task {task_id} out of range for workflow '{workflow}' ({count} tasks)")]
    TaskOutOfRange {
        workflow: String,
        task_id: usize,
        count: usize,
    },

    /// A task outcome would break ledger ordering.
    #[error("Run {run_id} of '{workflow}' has {recorded} task entries, cannot record task {task_id}")]
    LedgerGap {
        workflow: String,
        run_id: u32,
        recorded: usize,
        task_id: usize,
    },
}
