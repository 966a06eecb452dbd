//! Treadle - scheduled multi-step workflow runner
//!
//! Main entry point for the treadle CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

use commands::{apply, config, ctrl, delete, exec, run, status, version};
use treadle_config::LoggingConfig;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Treadle - scheduled multi-step workflow runner
#[derive(Parser)]
#[command(name = "treadle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file layered over the discovered ones
    #[arg(long, global = true, env = "TREADLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Workflow store directory
    #[arg(long, global = true, env = "TREADLE_STORE")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconciliation controller
    Ctrl(ctrl::CtrlArgs),

    /// Start one run of a workflow and wait for it to finish
    Run(run::RunArgs),

    /// Execute a single task of a run (execution unit entry point)
    Exec(exec::ExecArgs),

    /// Show workflows and their run ledgers
    Status(status::StatusArgs),

    /// Create or update a workflow from a JSON file
    Apply(apply::ApplyArgs),

    /// Delete a workflow
    Delete(delete::DeleteArgs),

    /// Show resolved configuration
    Config(config::ConfigArgs),

    /// Print version information
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = commands::Context::load(&cli)?;
    let _guard = init_logging(cli.verbose, &ctx.config.logging());
    for warning in &ctx.warnings {
        tracing::warn!("{warning}");
    }

    match cli.command {
        Commands::Ctrl(args) => ctrl::run(args, &ctx).await,
        Commands::Run(args) => run::run(args, &ctx).await,
        Commands::Exec(args) => exec::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
        Commands::Apply(args) => apply::run(args, &ctx).await,
        Commands::Delete(args) => delete::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx),
        Commands::Version => version::run(&ctx),
    }
}

/// Console (human-readable, stderr) plus rotating JSON file.
///
/// Returns the file writer's guard, or `None` when the log directory is
/// unusable and only the console layer is installed.
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    const CRATES: &[&str] = &[
        "treadle",
        "treadle_engine",
        "treadle_store",
        "treadle_launcher",
        "treadle_artifact",
        "treadle_config",
    ];
    let directives = |level: &str, rest: &str| {
        let mut parts: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
        parts.push(rest.to_string());
        parts.join(",")
    };

    let console_filter = if verbose {
        directives("debug", "info")
    } else {
        logging
            .level
            .clone()
            .unwrap_or_else(|| directives("info", "warn"))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(tracing_subscriber::EnvFilter::new(console_filter));

    let log_dir = logging.dir.clone().or_else(|| {
        treadle_config::user_config_dir().map(|d| d.join("logs"))
    });
    let Some(log_dir) = log_dir.filter(|d| std::fs::create_dir_all(d).is_ok()) else {
        tracing_subscriber::registry().with(console).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::daily(&log_dir, "treadle.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(directives(
                    "trace", "info",
                ))),
        )
        .init();
    Some(guard)
}
