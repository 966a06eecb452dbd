//! CLI command handlers.

pub mod apply;
pub mod config;
pub mod ctrl;
pub mod delete;
pub mod exec;
pub mod run;
pub mod status;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use treadle_config::{EngineConfig, StoreConfig, load_config, load_config_file};
use treadle_launcher::{ProcessLauncher, SharedLauncher};
use treadle_store::{FsStore, SharedStore};
use treadle_types::ObjectKey;

use crate::Cli;

/// Identifies one workflow on the command line.
#[derive(Args, Debug, Clone)]
pub struct WorkflowRef {
    /// Workflow name
    #[arg(short = 'w', long = "workflow")]
    pub name: String,

    /// Workflow namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,
}

impl WorkflowRef {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// Shared context for all commands, built once per invocation.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration after CLI overrides.
    pub config: EngineConfig,
    /// Config files that contributed, lowest precedence first.
    pub sources: Vec<PathBuf>,
    /// Config layers that were skipped.
    pub warnings: Vec<String>,
    /// Explicit `--config` file, forwarded to execution units.
    pub config_file: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().ok();
        let loaded = load_config(cwd.as_deref())?;
        let mut sources: Vec<PathBuf> = loaded
            .loaded_from()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();
        let warnings = loaded.warnings;
        let mut config = loaded.config;

        if let Some(path) = &cli.config {
            let layer = load_config_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            config.merge(layer);
            sources.push(path.clone());
        }
        if let Some(root) = &cli.store {
            config.store = Some(StoreConfig {
                root: Some(root.clone()),
            });
        }
        config.validate()?;

        Ok(Self {
            config,
            sources,
            warnings,
            config_file: cli.config.clone(),
            json_output: cli.json,
            verbose: cli.verbose,
        })
    }

    pub fn store_root(&self) -> PathBuf {
        self.config.store().root()
    }

    /// Open the workflow store. Failure here is fatal for every command.
    pub fn open_store(&self) -> Result<SharedStore> {
        let root = self.store_root();
        let store = FsStore::new(&root)
            .with_context(|| format!("cannot open workflow store at {}", root.display()))?;
        Ok(Arc::new(store))
    }

    /// Local launcher whose units run this binary's `exec` subcommand.
    ///
    /// Units inherit the resolved store location and explicit config file so
    /// they see the same state as the dispatcher.
    pub fn launcher(&self) -> Result<SharedLauncher> {
        let settings = self.config.launcher();
        let program = match settings.program.clone() {
            Some(program) => program,
            None => std::env::current_exe().context("cannot locate the treadle executable")?,
        };

        let mut env = vec![(
            "TREADLE_STORE".to_string(),
            self.store_root().display().to_string(),
        )];
        if let Some(path) = &self.config_file {
            env.push(("TREADLE_CONFIG".to_string(), path.display().to_string()));
        }

        let launcher = ProcessLauncher::new(program, settings.state_dir()).with_env(env);
        Ok(Arc::new(launcher))
    }
}

/// A token cancelled on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}
