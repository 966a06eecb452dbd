//! The workflow object: declared spec plus the run ledger.
//!
//! ```json
//! {
//!   "apiVersion": "treadle.io/v1",
//!   "kind": "Workflow",
//!   "metadata": { "name": "nightly", "namespace": "default" },
//!   "spec": {
//!     "schedule": "*/5 * * * *",
//!     "artifacts": true,
//!     "tasks": [
//!       { "name": "fetch", "command": { "inline": { "command": "curl", "args": ["-s", "https://example.com"] } } },
//!       { "name": "report", "command": { "script": "echo \"$TREADLE_INPUT\" | wc -c" } }
//!     ]
//!   },
//!   "status": { "runs": [] }
//! }
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectKey, ObjectMeta, TypeMeta};
use crate::schedule::CronSchedule;
use crate::{Result, TypesError};

/// A workflow: a named, ordered list of tasks with an optional schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    pub spec: WorkflowSpec,

    #[serde(default)]
    pub status: WorkflowStatus,
}

/// Declared state of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Cron expression; empty means manual trigger only.
    #[serde(default)]
    pub schedule: String,

    /// Tasks in execution order.
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Whether runs stage files between tasks through an artifact store.
    #[serde(default)]
    pub artifacts: bool,
}

/// One step of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,

    #[serde(default)]
    pub command: TaskCommand,
}

/// Command wire form: at most one of `inline` or `script` is expected.
///
/// When both are populated the script wins, see [`TaskCommand::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineCommand>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// A direct executable invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineCommand {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

/// The command variant a task will actually run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedCommand<'a> {
    /// Script body to materialize and execute without arguments.
    Script(&'a str),
    /// Executable plus arguments.
    Inline(&'a InlineCommand),
}

impl TaskCommand {
    pub fn inline(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            inline: Some(InlineCommand {
                command: command.into(),
                args,
            }),
            script: None,
        }
    }

    pub fn script(body: impl Into<String>) -> Self {
        Self {
            inline: None,
            script: Some(body.into()),
        }
    }

    /// Pick the variant to execute. A non-blank script takes precedence over
    /// an inline command; blank fields count as unset.
    pub fn resolve(&self) -> Option<ResolvedCommand<'_>> {
        if let Some(body) = self.script.as_deref()
            && !body.trim().is_empty()
        {
            return Some(ResolvedCommand::Script(body));
        }
        match &self.inline {
            Some(inline) if !inline.command.trim().is_empty() => {
                Some(ResolvedCommand::Inline(inline))
            }
            _ => None,
        }
    }
}

/// Observed state of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    /// Append-only; `runs[i].id == i + 1`.
    #[serde(default)]
    pub runs: Vec<Run>,
}

/// One execution instance of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: u32,
    pub phase: RunPhase,
    #[serde(default)]
    pub tasks: Vec<TaskStatus>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Completed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Running => write!(f, "running"),
            RunPhase::Completed => write!(f, "completed"),
        }
    }
}

/// Recorded outcome of one task within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub name: String,
    pub status: TaskOutcome,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
}

/// Success classification of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failed,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Success => write!(f, "success"),
            TaskOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl TaskStatus {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskOutcome::Success,
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn failed(
        name: impl Into<String>,
        output: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status: TaskOutcome::Failed,
            output: output.into(),
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskOutcome::Success
    }
}

impl Workflow {
    /// Create an empty workflow with the type stamp applied.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_meta: TypeMeta::workflow(),
            metadata: ObjectMeta::new(namespace, name),
            spec: WorkflowSpec::default(),
            status: WorkflowStatus::default(),
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.spec.schedule = schedule.into();
        self
    }

    pub fn with_task(mut self, name: impl Into<String>, command: TaskCommand) -> Self {
        self.spec.tasks.push(Task {
            name: name.into(),
            command,
        });
        self
    }

    pub fn with_artifacts(mut self, enabled: bool) -> Self {
        self.spec.artifacts = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Re-apply `apiVersion`/`kind`; required before every store write.
    pub fn stamp(&mut self) {
        self.type_meta = TypeMeta::workflow();
    }

    /// Validate the declared spec.
    ///
    /// Checks a non-empty name, at least one task, unique non-empty task
    /// names, a runnable command per task, and a well-formed schedule.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| TypesError::InvalidWorkflow {
            workflow: self.metadata.name.clone(),
            reason,
        };

        if self.metadata.name.is_empty() {
            return Err(invalid("name cannot be empty".into()));
        }
        if self.spec.tasks.is_empty() {
            return Err(invalid("at least one task is required".into()));
        }

        let mut seen = HashSet::new();
        for task in &self.spec.tasks {
            if task.name.is_empty() {
                return Err(invalid("task name cannot be empty".into()));
            }
            if !seen.insert(task.name.as_str()) {
                return Err(invalid(format!("duplicate task name '{}'", task.name)));
            }
            if task.command.resolve().is_none() {
                return Err(invalid(format!(
                    "task '{}' has neither a script nor an inline command",
                    task.name
                )));
            }
        }

        if !self.spec.schedule.trim().is_empty() {
            CronSchedule::parse(&self.spec.schedule)?;
        }
        Ok(())
    }

    /// Append a new running run and return its ID (`len + 1`).
    pub fn begin_run(&mut self, now: DateTime<Utc>) -> u32 {
        let id = self.status.runs.len() as u32 + 1;
        self.status.runs.push(Run {
            id,
            phase: RunPhase::Running,
            tasks: Vec::new(),
            started_at: now,
            ended_at: None,
        });
        id
    }

    /// Look up a run by its 1-based ID.
    pub fn run(&self, run_id: u32) -> Option<&Run> {
        let idx = (run_id as usize).checked_sub(1)?;
        self.status.runs.get(idx).filter(|r| r.id == run_id)
    }

    fn run_mut(&mut self, run_id: u32) -> Result<&mut Run> {
        let workflow = self.metadata.name.clone();
        (run_id as usize)
            .checked_sub(1)
            .and_then(|idx| self.status.runs.get_mut(idx))
            .filter(|r| r.id == run_id)
            .ok_or(TypesError::RunNotFound { workflow, run_id })
    }

    /// Index of the last declared task, if any.
    pub fn last_task_index(&self) -> Option<usize> {
        self.spec.tasks.len().checked_sub(1)
    }

    pub fn is_last_task(&self, task_id: usize) -> bool {
        self.last_task_index() == Some(task_id)
    }

    /// Output of the task preceding `task_id` in the given run.
    ///
    /// Returns `None` for task 0 or when the previous entry was never recorded.
    pub fn previous_output(&self, run_id: u32, task_id: usize) -> Result<Option<&str>> {
        let run = self.run(run_id).ok_or_else(|| TypesError::RunNotFound {
            workflow: self.metadata.name.clone(),
            run_id,
        })?;
        let Some(prev) = task_id.checked_sub(1) else {
            return Ok(None);
        };
        Ok(run.tasks.get(prev).map(|t| t.output.as_str()))
    }

    /// Record a task outcome at position `task_id` of the run.
    ///
    /// Appends when the ledger is exactly `task_id` long and overwrites an
    /// existing entry at that position. Recording the last declared task
    /// completes the run. Returns whether the run completed.
    pub fn record_task(
        &mut self,
        run_id: u32,
        task_id: usize,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let count = self.spec.tasks.len();
        if task_id >= count {
            return Err(TypesError::TaskOutOfRange {
                workflow: self.metadata.name.clone(),
                task_id,
                count,
            });
        }
        let last = task_id + 1 == count;
        let workflow = self.metadata.name.clone();
        let run = self.run_mut(run_id)?;

        match run.tasks.len().cmp(&task_id) {
            std::cmp::Ordering::Less => {
                return Err(TypesError::LedgerGap {
                    workflow,
                    run_id,
                    recorded: run.tasks.len(),
                    task_id,
                });
            }
            std::cmp::Ordering::Equal => run.tasks.push(status),
            std::cmp::Ordering::Greater => run.tasks[task_id] = status,
        }

        if last {
            run.phase = RunPhase::Completed;
            run.ended_at = Some(now);
        }
        Ok(last)
    }
}
