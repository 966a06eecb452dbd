//! Workload launcher: recurring schedules, execution units and artifact
//! instances.
//!
//! The engine never touches processes or schedulers directly; it goes through
//! the [`Launcher`] trait. [`ProcessLauncher`] is the local implementation:
//! execution units are child processes, schedules live in a JSON registry,
//! and artifact instances are credential-guarded directories.

mod error;
mod process;
mod registry;
mod spec;

pub use error::{LauncherError, Result};
pub use process::ProcessLauncher;
pub use spec::{ScheduleSpec, UnitEvent, UnitSpec};

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use treadle_artifact::ArtifactAccess;
use treadle_types::ObjectKey;

/// Environment variable naming a unit's private working directory.
pub const WORK_DIR_ENV: &str = "TREADLE_WORK_DIR";

/// State changes of one execution unit. Ends after a terminal event.
pub type UnitEventStream = Pin<Box<dyn Stream<Item = UnitEvent> + Send>>;

/// Creates, inspects and removes the resources a workflow runs on.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// The recurring schedule stored under `key`, if any.
    async fn get_schedule(&self, key: &ObjectKey) -> Result<Option<ScheduleSpec>>;

    /// Register a new schedule. Fails if one already exists under its key.
    async fn create_schedule(&self, spec: &ScheduleSpec) -> Result<()>;

    /// Replace an existing schedule.
    async fn update_schedule(&self, spec: &ScheduleSpec) -> Result<()>;

    /// Remove a schedule.
    async fn delete_schedule(&self, key: &ObjectKey) -> Result<()>;

    /// Start an execution unit and return its key.
    async fn create_unit(&self, spec: UnitSpec) -> Result<ObjectKey>;

    /// Stop (if needed) and forget an execution unit.
    async fn delete_unit(&self, key: &ObjectKey) -> Result<()>;

    /// Follow a unit's state. The first item is its current state.
    async fn watch_unit(&self, key: &ObjectKey) -> Result<UnitEventStream>;

    /// Bring up an artifact instance for one workflow's run.
    async fn provision_artifacts(&self, workflow: &ObjectKey) -> Result<ArtifactAccess>;

    /// Tear down the workflow's artifact instance. Absence is not an error.
    async fn teardown_artifacts(&self, workflow: &ObjectKey) -> Result<()>;
}

/// A launcher shared across tasks.
pub type SharedLauncher = Arc<dyn Launcher>;
