//! Config command - shows the configuration this invocation resolved.

use anyhow::Result;
use clap::{Args, Subcommand};
use treadle_config::EngineConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration with defaults filled in
    Show,

    /// Show which config files were loaded, lowest precedence first
    Which,
}

pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = &ctx.config;
            let resolved = EngineConfig {
                store: Some(config.store()),
                controller: Some(config.controller()),
                dispatcher: Some(config.dispatcher()),
                executor: Some(config.executor()),
                launcher: Some(config.launcher()),
                logging: Some(config.logging()),
            };
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&resolved)?);
            } else {
                print!("{}", toml::to_string_pretty(&resolved)?);
            }
        }
        ConfigCommand::Which => {
            if ctx.sources.is_empty() {
                println!("No config files loaded; using defaults");
            }
            for source in &ctx.sources {
                println!("{}", source.display());
            }
            for warning in &ctx.warnings {
                println!("skipped: {warning}");
            }
        }
    }
    Ok(())
}
