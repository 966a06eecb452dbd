//! Run dispatcher: one run, tasks launched strictly one after another.

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use treadle_config::DispatcherConfig;
use treadle_launcher::{SharedLauncher, UnitEvent, UnitSpec};
use treadle_store::{SharedStore, read_modify_write, update_if_changed};
use treadle_types::{ObjectKey, RunPhase, TaskRequest, TaskStatus, Workflow};

use crate::Result;

/// How a task's execution unit ended, as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    Failed(String),
    /// The unit was removed before it finished.
    Vanished,
    /// No terminal state within the task timeout.
    TimedOut(Duration),
    /// The run was cancelled before or while the unit ran.
    Cancelled,
    /// The unit could not be created or watched.
    LaunchFailed(String),
}

impl UnitOutcome {
    /// Error text used when the ledger has to be back-filled.
    fn reason(&self) -> String {
        match self {
            UnitOutcome::Succeeded => "unit succeeded without recording a status".into(),
            UnitOutcome::Failed(message) => format!("unit failed: {message}"),
            UnitOutcome::Vanished => "unit disappeared before finishing".into(),
            UnitOutcome::TimedOut(after) => format!("unit timed out after {after:?}"),
            UnitOutcome::Cancelled => "run cancelled".into(),
            UnitOutcome::LaunchFailed(message) => format!("launch failed: {message}"),
        }
    }
}

/// One task's slot in a [`RunReport`].
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: usize,
    pub name: String,
    pub unit: UnitOutcome,
    /// The ledger entry after the unit ended.
    pub status: Option<TaskStatus>,
}

/// Summary of a dispatched run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow: ObjectKey,
    pub run_id: u32,
    pub phase: RunPhase,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// Completed with every task recorded as a success.
    pub fn succeeded(&self) -> bool {
        self.phase == RunPhase::Completed
            && self
                .tasks
                .iter()
                .all(|t| t.status.as_ref().is_some_and(TaskStatus::is_success))
    }
}

pub struct Dispatcher {
    store: SharedStore,
    launcher: SharedLauncher,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(store: SharedStore, launcher: SharedLauncher, config: DispatcherConfig) -> Self {
        Self {
            store,
            launcher,
            config,
        }
    }

    /// Start a new run of `key` and drive every task to a terminal state.
    ///
    /// A failed task does not stop the run; the next task is launched
    /// regardless. Once `cancel` fires, the running unit is torn down and the
    /// remaining tasks are recorded as failed.
    pub async fn dispatch(&self, key: &ObjectKey, cancel: CancellationToken) -> Result<RunReport> {
        let (workflow, run_id) =
            read_modify_write(self.store.as_ref(), key, self.config.conflict_retries, |wf| {
                wf.validate()?;
                Ok(wf.begin_run(Utc::now()))
            })
            .await?;
        info!(workflow = %key, run_id, tasks = workflow.spec.tasks.len(), "Run started");

        let artifacts = if workflow.spec.artifacts {
            match self.launcher.provision_artifacts(key).await {
                Ok(access) => Some(access),
                Err(e) => {
                    warn!(
                        workflow = %key,
                        run_id,
                        error = %e,
                        "Artifact store unavailable, running without it"
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut tasks = Vec::with_capacity(workflow.spec.tasks.len());
        for (task_id, task) in workflow.spec.tasks.iter().enumerate() {
            let unit = if cancel.is_cancelled() {
                UnitOutcome::Cancelled
            } else {
                let request =
                    TaskRequest::new(key.name.clone(), key.namespace.clone(), run_id, task_id);
                info!(workflow = %key, run_id, task_id, task = %task.name, "Launching task");
                self.run_unit(UnitSpec::for_task(&request, artifacts.as_ref()), &cancel)
                    .await
            };

            if unit == UnitOutcome::Succeeded {
                debug!(workflow = %key, run_id, task_id, "Task unit succeeded");
            } else {
                warn!(
                    workflow = %key,
                    run_id,
                    task_id,
                    outcome = ?unit,
                    "Task unit did not succeed"
                );
            }

            let status = self
                .ensure_recorded(key, run_id, task_id, &task.name, &unit)
                .await;
            tasks.push(TaskReport {
                task_id,
                name: task.name.clone(),
                unit,
                status,
            });
        }

        if artifacts.is_some()
            && let Err(e) = self.launcher.teardown_artifacts(key).await
        {
            warn!(workflow = %key, run_id, error = %e, "Failed to tear down artifact store");
        }

        let phase = match self.store.get(key).await {
            Ok(wf) => wf.run(run_id).map_or(RunPhase::Running, |r| r.phase),
            Err(e) => {
                warn!(workflow = %key, run_id, error = %e, "Could not re-read workflow after run");
                RunPhase::Running
            }
        };
        info!(workflow = %key, run_id, phase = %phase, "Run finished");

        Ok(RunReport {
            workflow: key.clone(),
            run_id,
            phase,
            tasks,
        })
    }

    /// Launch one unit and wait for it to end, then remove it.
    async fn run_unit(&self, spec: UnitSpec, cancel: &CancellationToken) -> UnitOutcome {
        let unit_key = match self.launcher.create_unit(spec.clone()).await {
            Ok(key) => key,
            Err(e) if e.is_already_exists() => {
                // Left over from an earlier run that never cleaned up.
                warn!(unit = %spec.key(), "Replacing stale execution unit");
                if let Err(e) = self.launcher.delete_unit(&spec.key()).await {
                    return UnitOutcome::LaunchFailed(e.to_string());
                }
                match self.launcher.create_unit(spec).await {
                    Ok(key) => key,
                    Err(e) => return UnitOutcome::LaunchFailed(e.to_string()),
                }
            }
            Err(e) => {
                error!(unit = %spec.key(), error = %e, "Failed to launch execution unit");
                return UnitOutcome::LaunchFailed(e.to_string());
            }
        };

        let outcome = match self.launcher.watch_unit(&unit_key).await {
            Err(e) => UnitOutcome::LaunchFailed(format!("watch failed: {e}")),
            Ok(mut events) => {
                let terminal = async {
                    while let Some(event) = events.next().await {
                        debug!(unit = %unit_key, event = ?event, "Unit state changed");
                        if event.is_terminal() {
                            return Some(event);
                        }
                    }
                    None
                };
                let limit = self.config.task_timeout();
                tokio::select! {
                    _ = cancel.cancelled() => UnitOutcome::Cancelled,
                    waited = tokio::time::timeout(limit, terminal) => match waited {
                        Err(_) => UnitOutcome::TimedOut(limit),
                        Ok(Some(UnitEvent::Succeeded)) => UnitOutcome::Succeeded,
                        Ok(Some(UnitEvent::Failed { message })) => UnitOutcome::Failed(message),
                        Ok(_) => UnitOutcome::Vanished,
                    },
                }
            }
        };

        if let Err(e) = self.launcher.delete_unit(&unit_key).await
            && !e.is_not_found()
        {
            warn!(unit = %unit_key, error = %e, "Failed to delete execution unit");
        }
        outcome
    }

    /// Return the ledger entry for `task_id`, writing a failed one if the
    /// unit ended without its executor recording anything.
    async fn ensure_recorded(
        &self,
        key: &ObjectKey,
        run_id: u32,
        task_id: usize,
        name: &str,
        unit: &UnitOutcome,
    ) -> Option<TaskStatus> {
        let recorded = |wf: &Workflow| {
            wf.run(run_id)
                .and_then(|run| run.tasks.get(task_id))
                .cloned()
        };

        let result = update_if_changed(
            self.store.as_ref(),
            key,
            self.config.conflict_retries,
            |wf| {
                if recorded(wf).is_some() {
                    return Ok(false);
                }
                let status = TaskStatus::failed(name, "", unit.reason());
                wf.record_task(run_id, task_id, status, Utc::now())?;
                Ok(true)
            },
        )
        .await;

        match result {
            Ok((wf, true)) => {
                warn!(
                    workflow = %key,
                    run_id,
                    task_id,
                    reason = %unit.reason(),
                    "Recorded missing task status as failed"
                );
                recorded(&wf)
            }
            Ok((wf, false)) => recorded(&wf),
            Err(e) => {
                error!(
                    workflow = %key,
                    run_id,
                    task_id,
                    error = %e,
                    "Could not record missing task status"
                );
                None
            }
        }
    }
}
