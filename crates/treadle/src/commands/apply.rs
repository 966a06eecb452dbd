//! Apply command - creates a workflow or replaces its spec.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use treadle_store::read_modify_write;
use treadle_types::{Workflow, WorkflowStatus};

use super::Context;

/// Arguments for the apply command.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Workflow definition (JSON)
    #[arg(short, long)]
    pub file: PathBuf,

    /// Namespace to apply into (overrides the file)
    #[arg(short, long)]
    pub namespace: Option<String>,
}

pub async fn run(args: ApplyArgs, ctx: &Context) -> Result<()> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let mut incoming: Workflow = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;
    if let Some(namespace) = args.namespace {
        incoming.metadata.namespace = namespace;
    }
    incoming.validate()?;

    let store = ctx.open_store()?;
    let key = incoming.key();
    let outcome = match store.get(&key).await {
        Ok(existing) if existing.spec == incoming.spec => "unchanged",
        Ok(_) => {
            // Only `spec` is replaced; the run ledger belongs to the engine.
            let spec = incoming.spec;
            let retries = ctx.config.dispatcher().conflict_retries;
            read_modify_write(store.as_ref(), &key, retries, |wf| {
                wf.spec = spec.clone();
                Ok(())
            })
            .await?;
            "configured"
        }
        Err(e) if e.is_not_found() => {
            incoming.stamp();
            incoming.metadata.resource_version = None;
            incoming.status = WorkflowStatus::default();
            store.put(incoming).await?;
            "created"
        }
        Err(e) => return Err(e.into()),
    };

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "workflow": key.to_string(), "result": outcome })
        );
    } else {
        println!("workflow {key} {outcome}");
    }
    Ok(())
}
