//! Task executor: performs one task of one run and records the outcome.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use treadle_artifact::{ArtifactStore, download_all, upload_dir};
use treadle_config::ExecutorConfig;
use treadle_store::{SharedStore, read_modify_write};
use treadle_types::{ObjectKey, TaskRequest, TaskStatus, TypesError};

use crate::Result;
use crate::command::CommandRunner;

pub struct TaskExecutor {
    store: SharedStore,
    config: ExecutorConfig,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl TaskExecutor {
    pub fn new(store: SharedStore, config: ExecutorConfig) -> Self {
        Self {
            store,
            config,
            artifacts: None,
        }
    }

    /// Artifact store to stage files through when the workflow asks for it.
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Run the task named by `request` and write its status to the ledger.
    ///
    /// Errors are returned only when the workflow cannot be read or does not
    /// contain the requested run and task. A failing command, artifact
    /// transfer problems and a failed status write are logged; the status
    /// is still returned.
    pub async fn execute(&self, request: &TaskRequest) -> Result<TaskStatus> {
        let key = ObjectKey::new(&request.namespace, &request.workflow);
        let (run_id, task_id) = (request.run_id, request.task_id);

        let workflow = self.store.get(&key).await?;
        let task = workflow
            .spec
            .tasks
            .get(task_id)
            .ok_or_else(|| TypesError::TaskOutOfRange {
                workflow: key.name.clone(),
                task_id,
                count: workflow.spec.tasks.len(),
            })?;
        let command = task
            .command
            .resolve()
            .ok_or_else(|| TypesError::InvalidWorkflow {
                workflow: key.name.clone(),
                reason: format!("task '{}' has no command", task.name),
            })?;

        let mut env = Vec::new();
        match workflow.previous_output(run_id, task_id)? {
            Some(previous) => env.push((self.config.input_env.clone(), previous.to_string())),
            None if task_id > 0 => {
                warn!(workflow = %key, run_id, task_id, "Previous task has no recorded output")
            }
            None => {}
        }

        let staging = if workflow.spec.artifacts {
            if self.artifacts.is_none() {
                warn!(
                    workflow = %key,
                    run_id,
                    task_id,
                    "Artifacts enabled but no artifact store configured"
                );
            }
            self.artifacts.as_deref()
        } else {
            None
        };

        if let Some(artifacts) = staging
            && task_id > 0
        {
            let incoming = self.config.incoming_dir();
            match download_all(artifacts, workflow.name(), &incoming).await {
                Ok(count) => {
                    debug!(workflow = %key, run_id, task_id, count, "Downloaded artifacts")
                }
                Err(e) => {
                    warn!(workflow = %key, run_id, task_id, error = %e, "Artifact download failed")
                }
            }
        }

        info!(workflow = %key, run_id, task_id, task = %task.name, "Executing task");
        let runner = CommandRunner::new(self.config.script_dir());
        let script_name = format!("{}-{run_id}-{task_id}", workflow.name());
        let outcome = runner.run(command, &env, &script_name).await;

        if let Some(artifacts) = staging
            && !workflow.is_last_task(task_id)
        {
            let outgoing = self.config.outgoing_dir();
            match upload_dir(artifacts, workflow.name(), &outgoing).await {
                Ok(count) => {
                    debug!(workflow = %key, run_id, task_id, count, "Uploaded artifacts")
                }
                Err(e) => {
                    warn!(workflow = %key, run_id, task_id, error = %e, "Artifact upload failed")
                }
            }
        }

        let status = match outcome.error {
            None => TaskStatus::success(&task.name, outcome.output),
            Some(error) => TaskStatus::failed(&task.name, outcome.output, error),
        };
        match &status.error {
            e if e.is_empty() => info!(workflow = %key, run_id, task_id, "Task succeeded"),
            e => warn!(workflow = %key, run_id, task_id, error = %e, "Task failed"),
        }

        let write = read_modify_write(
            self.store.as_ref(),
            &key,
            self.config.conflict_retries,
            |wf| Ok(wf.record_task(run_id, task_id, status.clone(), Utc::now())?),
        )
        .await;
        match write {
            Ok((_, true)) => info!(workflow = %key, run_id, "Run completed"),
            Ok((_, false)) => {}
            Err(e) => error!(
                workflow = %key,
                run_id,
                task_id,
                error = %e,
                "Failed to record task status"
            ),
        }

        Ok(status)
    }
}
