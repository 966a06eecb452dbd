//! Ctrl command - runs the reconciliation controller until interrupted.

use anyhow::Result;
use clap::Args;
use tracing::info;
use treadle_engine::Controller;

use super::{Context, cancel_on_ctrl_c};

/// Arguments for the ctrl command.
#[derive(Args, Debug)]
pub struct CtrlArgs {
    /// Number of reconcile workers (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Seconds to wait for the initial workflow list (overrides config)
    #[arg(long)]
    pub sync_timeout: Option<u64>,
}

pub async fn run(args: CtrlArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let launcher = ctx.launcher()?;

    let mut config = ctx.config.controller();
    if let Some(workers) = args.workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.workers = workers;
    }
    if let Some(secs) = args.sync_timeout {
        config.sync_timeout_secs = secs;
    }

    info!(store = %ctx.store_root().display(), workers = config.workers, "Starting controller");
    Controller::new(store, launcher, config)
        .run(cancel_on_ctrl_c())
        .await?;
    info!("Controller stopped");
    Ok(())
}
