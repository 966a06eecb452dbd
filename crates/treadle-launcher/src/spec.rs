//! Resource shapes the launcher creates.

use serde::{Deserialize, Serialize};
use treadle_artifact::ArtifactAccess;
use treadle_types::{ObjectKey, TaskRequest, Workflow, dispatch_args, schedule_name};

/// A recurring trigger that starts a run of one workflow.
///
/// Finished invocations are not kept; only the schedule itself persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub name: String,
    pub namespace: String,
    /// Cron expression the trigger fires on.
    pub schedule: String,
    /// Workflow the trigger dispatches.
    pub workflow: String,
    /// Arguments passed to the engine binary on each firing.
    pub args: Vec<String>,
}

impl ScheduleSpec {
    /// The schedule a workflow declares, named `wf-cron-<workflow>`.
    pub fn for_workflow(workflow: &Workflow) -> Self {
        Self {
            name: schedule_name(workflow.name()),
            namespace: workflow.namespace().to_string(),
            schedule: workflow.spec.schedule.trim().to_string(),
            workflow: workflow.name().to_string(),
            args: dispatch_args(workflow.name(), workflow.namespace()),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Key of the schedule owned by the workflow at `workflow`.
    pub fn key_for(workflow: &ObjectKey) -> ObjectKey {
        ObjectKey::new(&workflow.namespace, schedule_name(&workflow.name))
    }
}

/// One out-of-process execution of a task executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub namespace: String,
    /// Arguments passed to the unit's program.
    pub args: Vec<String>,
    /// Extra environment for the unit.
    pub env: Vec<(String, String)>,
}

impl UnitSpec {
    /// Unit `<workflow>-task-<i>` running `exec` for the request, with
    /// artifact access injected when provided.
    pub fn for_task(request: &TaskRequest, artifacts: Option<&ArtifactAccess>) -> Self {
        Self {
            name: request.unit_name(),
            namespace: request.namespace.clone(),
            args: request.exec_args(),
            env: artifacts.map(ArtifactAccess::env_vars).unwrap_or_default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Observed condition of an execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    /// Created but not yet started.
    Pending,
    Running,
    /// Exited successfully.
    Succeeded,
    /// Exited unsuccessfully or could not run.
    Failed { message: String },
    /// Removed before reaching a terminal condition.
    Vanished,
}

impl UnitEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitEvent::Succeeded | UnitEvent::Failed { .. } | UnitEvent::Vanished
        )
    }
}
