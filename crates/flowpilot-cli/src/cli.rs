//! CLI argument definitions for flowpilot.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// flowpilot -- trigger-driven workflow automation.
#[derive(Parser)]
#[command(
    name = "flowpilot",
    version,
    about = "flowpilot -- trigger-driven workflow automation",
    long_about = "Watches triggers, analyses the owner's context, suggests actions and runs \
                  the approved ones."
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, global = true, env = "FLOWPILOT_CONFIG", default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon: reload triggers, process queued workflows until Ctrl-C.
    Run,

    /// Manage triggers.
    Triggers {
        #[command(subcommand)]
        action: TriggerAction,
    },

    /// Inspect or cancel workflow executions.
    Executions {
        #[command(subcommand)]
        action: ExecutionAction,
    },

    /// Show rolling metrics of one workflow (trigger id).
    Metrics {
        workflow_id: String,
    },

    /// Show or change an owner's approval preferences.
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Inspect the action catalog.
    Actions {
        #[command(subcommand)]
        action: ActionsAction,
    },

    /// Show database, trigger and execution status.
    Status,
}

#[derive(Subcommand)]
pub enum TriggerAction {
    /// Register a new trigger.
    Add {
        #[arg(long)]
        owner: String,
        /// Trigger type, e.g. `time_based` or `email_received`.
        #[arg(long = "type")]
        trigger_type: String,
        /// Type-specific metadata as a JSON object.
        #[arg(long, default_value = "{}")]
        metadata: String,
        /// Condition list as a JSON array.
        #[arg(long, default_value = "[]")]
        conditions: String,
        /// Persist without activating.
        #[arg(long)]
        disabled: bool,
    },
    /// List an owner's triggers.
    List {
        #[arg(long)]
        owner: String,
        #[arg(long = "type")]
        trigger_type: Option<String>,
    },
    /// Show one trigger, with upcoming runs for time-based triggers.
    Show {
        id: String,
        /// Number of upcoming runs to preview.
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Fire a trigger and wait for the resulting execution.
    Fire {
        id: String,
        /// Firing payload as a JSON object.
        #[arg(long, default_value = "{}")]
        data: String,
        /// Seconds to wait for the execution to finish.
        #[arg(long, default_value_t = 120)]
        wait: u64,
    },
}

#[derive(Subcommand)]
pub enum ExecutionAction {
    Show {
        id: String,
    },
    /// Most recent executions of an owner.
    List {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Cancel an execution still running in this process.
    Cancel {
        id: String,
    },
}

#[derive(Subcommand)]
pub enum PrefsAction {
    Show {
        #[arg(long)]
        owner: String,
    },
    /// Update the given fields; the rest keep their current value.
    Set {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        auto_approve: Option<bool>,
        #[arg(long)]
        confidence_threshold: Option<f64>,
        #[arg(long)]
        min_priority: Option<u8>,
        #[arg(long)]
        max_auto_actions: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum ActionsAction {
    /// List every action type with its parameters and requirements.
    List,
}
