//! Delete command - removes a workflow and, through the controller, its schedule.

use anyhow::Result;
use clap::Args;

use super::{Context, WorkflowRef};

/// Arguments for the delete command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub workflow: WorkflowRef,
}

pub async fn run(args: DeleteArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let key = args.workflow.key();
    store.delete(&key).await?;
    println!("workflow {key} deleted");
    Ok(())
}
