//! CLI entry point for flowpilot.
//!
//! This binary provides the `flowpilot` command: the daemon (`run`) plus
//! administration subcommands for triggers, executions, metrics and
//! approval preferences.

mod cli;
mod commands;
mod config;
mod helpers;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;
    helpers::init_tracing(&config.logging);

    match cli.command {
        Commands::Run => commands::cmd_run(&config).await,
        Commands::Triggers { action } => commands::cmd_triggers(&config, action).await,
        Commands::Executions { action } => commands::cmd_executions(&config, action).await,
        Commands::Metrics { workflow_id } => commands::cmd_metrics(&config, &workflow_id).await,
        Commands::Prefs { action } => commands::cmd_prefs(&config, action).await,
        Commands::Actions { action } => commands::cmd_actions(action),
        Commands::Status => commands::cmd_status(&config).await,
    }
}
