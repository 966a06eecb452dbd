//! Status command - shows workflows and their run ledgers.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use treadle_store::SharedStore;
use treadle_types::{ObjectKey, Run, TaskStatus, Workflow};

use super::Context;

/// Longest output excerpt shown per task in the table view.
const EXCERPT: usize = 60;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Workflow to inspect; omit to list all
    #[arg(short = 'w', long = "workflow")]
    pub name: Option<String>,

    /// Namespace to look in; omit with no workflow to list every namespace
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Only show the most recent N runs
    #[arg(long)]
    pub last: Option<usize>,
}

/// One row of the workflow listing.
#[derive(Debug, Serialize)]
struct WorkflowSummary {
    workflow: String,
    schedule: String,
    tasks: usize,
    runs: usize,
    last_phase: Option<String>,
}

pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    match &args.name {
        Some(name) => {
            let namespace = args.namespace.as_deref().unwrap_or("default");
            show_workflow(&store, &ObjectKey::new(namespace, name), args.last, ctx).await
        }
        None => list_workflows(&store, args.namespace.as_deref(), ctx).await,
    }
}

async fn list_workflows(store: &SharedStore, namespace: Option<&str>, ctx: &Context) -> Result<()> {
    let summaries: Vec<WorkflowSummary> = store
        .list(namespace)
        .await?
        .iter()
        .map(|wf| WorkflowSummary {
            workflow: wf.key().to_string(),
            schedule: wf.spec.schedule.clone(),
            tasks: wf.spec.tasks.len(),
            runs: wf.status.runs.len(),
            last_phase: wf.status.runs.last().map(|r| r.phase.to_string()),
        })
        .collect();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    if summaries.is_empty() {
        println!("{}", dim.apply_to("No workflows found"));
        return Ok(());
    }
    for s in &summaries {
        let schedule = if s.schedule.is_empty() {
            "manual".to_string()
        } else {
            s.schedule.clone()
        };
        println!(
            "{}  {}  {} tasks  {} runs  {}",
            style(&s.workflow).bold(),
            dim.apply_to(schedule),
            s.tasks,
            s.runs,
            s.last_phase.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn show_workflow(
    store: &SharedStore,
    key: &ObjectKey,
    last: Option<usize>,
    ctx: &Context,
) -> Result<()> {
    let workflow = store.get(key).await?;
    let runs = recent_runs(&workflow, last);

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(runs)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style(format!("Workflow {key}")).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    let schedule = match workflow.spec.schedule.as_str() {
        "" => "manual",
        s => s,
    };
    println!("  {} {}", dim.apply_to("Schedule:"), schedule);
    println!("  {} {}", dim.apply_to("Tasks:"), workflow.spec.tasks.len());
    println!("  {} {}", dim.apply_to("Runs:"), workflow.status.runs.len());

    for run in runs {
        print_run(run);
    }
    println!();
    Ok(())
}

fn recent_runs(workflow: &Workflow, last: Option<usize>) -> &[Run] {
    let runs = workflow.status.runs.as_slice();
    match last {
        Some(n) => &runs[runs.len().saturating_sub(n)..],
        None => runs,
    }
}

fn print_run(run: &Run) {
    let dim = Style::new().dim();
    println!();
    let ended = run
        .ended_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  Run {}  {}  {} {}  {} {}",
        run.id,
        run.phase,
        dim.apply_to("started"),
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        dim.apply_to("ended"),
        ended,
    );
    for (index, task) in run.tasks.iter().enumerate() {
        print_task(index, task);
    }
}

fn print_task(index: usize, task: &TaskStatus) {
    let status = if task.is_success() {
        Style::new().green().apply_to(task.status.to_string())
    } else {
        Style::new().red().apply_to(task.status.to_string())
    };
    let detail = if task.is_success() {
        &task.output
    } else {
        &task.error
    };
    println!(
        "    {index} {}  {}  {}",
        task.name,
        status,
        Style::new().dim().apply_to(excerpt(detail))
    );
}

/// First line of `text`, shortened to fit the table.
fn excerpt(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > EXCERPT {
        let cut: String = line.chars().take(EXCERPT - 1).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
