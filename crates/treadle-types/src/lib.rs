//! Shared types for the treadle workflow engine.
//!
//! The [`Workflow`] object is the single persisted entity: its `spec` holds the
//! declared schedule and ordered task list, its `status` holds the append-only
//! run ledger that dispatchers and executors write back to.

pub mod error;
pub mod event;
pub mod meta;
pub mod request;
pub mod schedule;
pub mod workflow;

pub use error::{Result, TypesError};
pub use event::WatchEvent;
pub use meta::{API_VERSION, KIND, ObjectKey, ObjectMeta, TypeMeta};
pub use request::{TaskRequest, artifact_instance_name, dispatch_args, schedule_name, unit_name};
pub use schedule::CronSchedule;
pub use workflow::{
    InlineCommand, ResolvedCommand, Run, RunPhase, Task, TaskCommand, TaskOutcome, TaskStatus,
    Workflow, WorkflowSpec, WorkflowStatus,
};
