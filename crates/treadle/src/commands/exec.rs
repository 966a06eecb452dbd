//! Exec command - runs one task inside its execution unit.
//!
//! The task's outcome goes to the workflow store only. A failing task still
//! exits zero; a non-zero exit means the task could not be looked up.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::warn;
use treadle_artifact::{ArtifactAccess, ENDPOINT_ENV, FsArtifactStore};
use treadle_engine::TaskExecutor;
use treadle_launcher::WORK_DIR_ENV;
use treadle_types::TaskRequest;

use super::{Context, WorkflowRef};

/// Arguments for the exec command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub workflow: WorkflowRef,

    /// Run ID (1-based)
    #[arg(short = 'r', long = "run")]
    pub run_id: u32,

    /// Task index (0-based)
    #[arg(short = 't', long = "task")]
    pub task_id: usize,
}

pub async fn run(args: ExecArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let mut config = ctx.config.executor();
    // Launched units stage files in their own directory.
    if let Some(dir) = std::env::var_os(WORK_DIR_ENV) {
        config = config.in_work_dir(dir);
    }
    let mut executor = TaskExecutor::new(store, config);

    if std::env::var_os(ENDPOINT_ENV).is_some() {
        match connect_artifacts().await {
            Ok(artifacts) => executor = executor.with_artifacts(Arc::new(artifacts)),
            Err(e) => warn!(error = %e, "Artifact store unavailable"),
        }
    }

    let request = TaskRequest::new(
        args.workflow.name,
        args.workflow.namespace,
        args.run_id,
        args.task_id,
    );
    executor.execute(&request).await?;
    Ok(())
}

async fn connect_artifacts() -> treadle_artifact::Result<FsArtifactStore> {
    let access = ArtifactAccess::from_env()?;
    FsArtifactStore::connect(&access).await
}
