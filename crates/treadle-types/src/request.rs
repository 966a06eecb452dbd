//! Parameters handed to execution units, and the names derived from them.

use serde::{Deserialize, Serialize};

/// Prefix of the recurring-schedule resource owned by a workflow.
const SCHEDULE_PREFIX: &str = "wf-cron-";

/// Name of the recurring-schedule resource for a workflow.
pub fn schedule_name(workflow: &str) -> String {
    format!("{SCHEDULE_PREFIX}{workflow}")
}

/// Name of the execution unit running task `task_id` of a workflow.
pub fn unit_name(workflow: &str, task_id: usize) -> String {
    format!("{workflow}-task-{task_id}")
}

/// Name of the artifact-store instance provisioned for a workflow's run.
pub fn artifact_instance_name(workflow: &str) -> String {
    format!("{workflow}-artifact")
}

/// Everything a task executor needs to locate its work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub workflow: String,
    pub namespace: String,
    /// 1-based run ID.
    pub run_id: u32,
    /// 0-based index into the workflow's task list.
    pub task_id: usize,
}

impl TaskRequest {
    pub fn new(
        workflow: impl Into<String>,
        namespace: impl Into<String>,
        run_id: u32,
        task_id: usize,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            namespace: namespace.into(),
            run_id,
            task_id,
        }
    }

    pub fn unit_name(&self) -> String {
        unit_name(&self.workflow, self.task_id)
    }

    /// Command-line arguments of the `exec` entry point.
    pub fn exec_args(&self) -> Vec<String> {
        vec![
            "exec".into(),
            "-w".into(),
            self.workflow.clone(),
            "-n".into(),
            self.namespace.clone(),
            "-r".into(),
            self.run_id.to_string(),
            "-t".into(),
            self.task_id.to_string(),
        ]
    }
}

/// Command-line arguments of the `run` entry point triggered by a schedule.
pub fn dispatch_args(workflow: &str, namespace: &str) -> Vec<String> {
    vec![
        "run".into(),
        "-w".into(),
        workflow.to_string(),
        "-n".into(),
        namespace.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(schedule_name("nightly"), "wf-cron-nightly");
        assert_eq!(unit_name("nightly", 2), "nightly-task-2");
        assert_eq!(artifact_instance_name("nightly"), "nightly-artifact");
    }

    #[test]
    fn test_exec_args() {
        let req = TaskRequest::new("nightly", "ops", 3, 1);
        assert_eq!(
            req.exec_args(),
            ["exec", "-w", "nightly", "-n", "ops", "-r", "3", "-t", "1"]
        );
        assert_eq!(req.unit_name(), "nightly-task-1");
        assert_eq!(dispatch_args("nightly", "ops"), ["run", "-w", "nightly", "-n", "ops"]);
    }
}
