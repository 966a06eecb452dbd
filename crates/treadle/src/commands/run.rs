//! Run command - the entry point a schedule fires.

use anyhow::Result;
use clap::Args;
use console::Style;
use serde_json::json;
use treadle_engine::{Dispatcher, RunReport};

use super::{Context, WorkflowRef, cancel_on_ctrl_c};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub workflow: WorkflowRef,

    /// Seconds to wait for each task's unit (overrides config)
    #[arg(long)]
    pub task_timeout: Option<u64>,
}

pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let launcher = ctx.launcher()?;

    let mut config = ctx.config.dispatcher();
    if let Some(secs) = args.task_timeout {
        anyhow::ensure!(secs > 0, "--task-timeout must be at least 1");
        config.task_timeout_secs = secs;
    }

    let report = Dispatcher::new(store, launcher, config)
        .dispatch(&args.workflow.key(), cancel_on_ctrl_c())
        .await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn report_json(report: &RunReport) -> serde_json::Value {
    json!({
        "workflow": report.workflow.to_string(),
        "runId": report.run_id,
        "phase": report.phase.to_string(),
        "succeeded": report.succeeded(),
        "tasks": report.tasks.iter().map(|t| json!({
            "taskId": t.task_id,
            "name": t.name,
            "unit": format!("{:?}", t.unit),
            "status": t.status,
        })).collect::<Vec<_>>(),
    })
}

fn print_report(report: &RunReport) {
    let dim = Style::new().dim();
    let green = Style::new().green();
    let red = Style::new().red();

    println!(
        "Run {} of {} {}",
        report.run_id,
        report.workflow,
        dim.apply_to(&report.phase)
    );
    for task in &report.tasks {
        let (mark, detail) = match &task.status {
            Some(status) if status.is_success() => (green.apply_to("✓"), String::new()),
            Some(status) => (red.apply_to("✗"), status.error.clone()),
            None => (red.apply_to("?"), "no status recorded".to_string()),
        };
        println!("  {mark} {} {}", task.name, dim.apply_to(detail));
    }
}
