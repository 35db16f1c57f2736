//! Subcommand implementations.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use flowpilot_engine::action::catalog;
use flowpilot_engine::schedule::next_runs;
use flowpilot_engine::{Runtime, TriggerMetadata, TriggerSpec, TriggerType, WorkflowPreferences};
use flowpilot_kernel::JobStatus;
use serde_json::{Value, json};
use tracing::info;

use crate::cli::{ActionsAction, ExecutionAction, PrefsAction, TriggerAction};
use crate::config::AppConfig;
use crate::helpers::{build_generator, open_stores, parse_json, print_json};

async fn build_runtime(config: &AppConfig) -> Result<Runtime> {
    let stores = open_stores(config).await?;
    let generator = build_generator(&config.llm)?;
    Ok(Runtime::new(stores, generator, &config.engine_config()))
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

pub async fn cmd_run(config: &AppConfig) -> Result<()> {
    info!("starting flowpilot");
    let runtime = build_runtime(config).await?;
    let worker = runtime.start().await.context("failed to start runtime")?;

    println!();
    println!("  flowpilot v{}", env!("CARGO_PKG_VERSION"));
    println!("  {} trigger(s) active. Press Ctrl-C to stop.", runtime.triggers.live_count());
    println!();

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    runtime.shutdown();
    worker.await.context("queue worker panicked")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: triggers
// ---------------------------------------------------------------------------

pub async fn cmd_triggers(config: &AppConfig, action: TriggerAction) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let triggers = &runtime.triggers;

    match action {
        TriggerAction::Add {
            owner,
            trigger_type,
            metadata,
            conditions,
            disabled,
        } => {
            let trigger_type: TriggerType = trigger_type.parse()?;
            let mut metadata = parse_json(&metadata, "metadata")?;
            if trigger_type == TriggerType::ContextPolling
                && let Value::Object(map) = &mut metadata
            {
                map.entry("interval_secs")
                    .or_insert(json!(config.scheduler.default_poll_interval_secs));
            }
            let conditions = parse_json(&conditions, "conditions")?;
            let mut spec = TriggerSpec::from_parts(trigger_type.as_str(), &metadata, &conditions)?;
            if disabled {
                spec = spec.disabled();
            }
            let trigger = triggers.register(&owner, spec).await?;
            print_json(&trigger.to_value())?;
        }
        TriggerAction::List { owner, trigger_type } => {
            let filter = trigger_type.map(|t| t.parse::<TriggerType>()).transpose()?;
            let list = triggers.get_triggers_for_owner(&owner, filter).await?;
            if list.is_empty() {
                println!("  No triggers for {owner}.");
            }
            for trigger in list {
                println!(
                    "  {}  {:<18} {}",
                    trigger.id,
                    trigger.trigger_type().as_str(),
                    if trigger.enabled { "enabled" } else { "disabled" }
                );
            }
        }
        TriggerAction::Show { id, runs } => {
            let trigger = triggers.load_trigger(&id).await?;
            print_json(&trigger.to_value())?;
            if let TriggerMetadata::TimeBased { cron } = &trigger.metadata {
                println!();
                println!("  Next runs:");
                for at in next_runs(cron, runs)? {
                    println!("    {}", at.to_rfc3339());
                }
            }
        }
        TriggerAction::Enable { id } => {
            triggers.set_enabled(&id, true).await?;
            println!("  Trigger {id} enabled.");
        }
        TriggerAction::Disable { id } => {
            triggers.set_enabled(&id, false).await?;
            println!("  Trigger {id} disabled.");
        }
        TriggerAction::Delete { id } => {
            triggers.delete(&id).await?;
            println!("  Trigger {id} deleted.");
        }
        TriggerAction::Fire { id, data, wait } => {
            let data = parse_json(&data, "data")?;
            let trigger = triggers.load_trigger(&id).await?;
            if !trigger.enabled {
                bail!("trigger {id} is disabled");
            }
            let worker = runtime.start().await?;
            let outcome = fire_and_wait(&runtime, &trigger.owner_id, &id, data, Duration::from_secs(wait)).await;
            runtime.shutdown();
            worker.await.context("queue worker panicked")?;
            outcome?;
        }
    }
    Ok(())
}

async fn fire_and_wait(runtime: &Runtime, owner_id: &str, trigger_id: &str, data: Value, wait: Duration) -> Result<()> {
    let Some(job_id) = runtime.triggers.fire(trigger_id, data)? else {
        println!("  Conditions not met; nothing was queued.");
        return Ok(());
    };
    println!("  Queued job {job_id}.");

    let deadline = tokio::time::Instant::now() + wait;
    let info = loop {
        let info = runtime.queue.status(job_id)?;
        if matches!(info.status, JobStatus::Completed | JobStatus::Failed) {
            break info;
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("job {job_id} still running after {}s", wait.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    if let Some(error) = &info.error {
        println!("  Job failed: {error}");
    }
    if let Some(execution) = runtime.engine.list_executions(owner_id, 1).await?.into_iter().next() {
        print_json(&execution)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: executions
// ---------------------------------------------------------------------------

pub async fn cmd_executions(config: &AppConfig, action: ExecutionAction) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let engine = &runtime.engine;

    match action {
        ExecutionAction::Show { id } => print_json(&engine.get_execution(&id).await?)?,
        ExecutionAction::List { owner, limit } => {
            let executions = engine.list_executions(&owner, limit).await?;
            if executions.is_empty() {
                println!("  No executions for {owner}.");
            }
            for execution in executions {
                let failed = execution.executed_actions.iter().filter(|a| a.failed()).count();
                println!(
                    "  {}  {:<10} {}  workflow={}  actions={} failed={}",
                    execution.id,
                    execution.status.as_str(),
                    execution.started_at.to_rfc3339(),
                    execution.workflow_id,
                    execution.executed_actions.len(),
                    failed
                );
            }
        }
        ExecutionAction::Cancel { id } => {
            let execution = engine.cancel(&id).await?;
            println!("  Execution {} cancelled.", execution.id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: metrics, prefs, actions
// ---------------------------------------------------------------------------

pub async fn cmd_metrics(config: &AppConfig, workflow_id: &str) -> Result<()> {
    let runtime = build_runtime(config).await?;
    match runtime.engine.get_metrics(workflow_id).await? {
        Some(m) => {
            println!();
            println!("  Workflow {workflow_id}");
            println!("    Executions:   {}", m.execution_count);
            println!("    Success rate: {:.0}%", m.success_rate * 100.0);
            println!("    Avg duration: {:.0} ms", m.avg_duration_ms);
            println!("    Time saved:   {:.0} min", m.time_saved_minutes);
            if let Some(last) = m.last_executed {
                println!("    Last run:     {}", last.to_rfc3339());
            }
            println!();
        }
        None => println!("  No executions recorded for {workflow_id}."),
    }
    Ok(())
}

pub async fn cmd_prefs(config: &AppConfig, action: PrefsAction) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let engine = &runtime.engine;

    match action {
        PrefsAction::Show { owner } => print_json(&engine.get_preferences(&owner).await?)?,
        PrefsAction::Set {
            owner,
            auto_approve,
            confidence_threshold,
            min_priority,
            max_auto_actions,
        } => {
            let current = engine.get_preferences(&owner).await?;
            let prefs = WorkflowPreferences {
                auto_approve: auto_approve.unwrap_or(current.auto_approve),
                confidence_threshold: confidence_threshold.unwrap_or(current.confidence_threshold),
                min_priority: min_priority.unwrap_or(current.min_priority),
                max_auto_actions: max_auto_actions.unwrap_or(current.max_auto_actions),
            };
            engine.set_preferences(&owner, &prefs).await?;
            print_json(&prefs)?;
        }
    }
    Ok(())
}

pub fn cmd_actions(action: ActionsAction) -> Result<()> {
    match action {
        ActionsAction::List => {
            for definition in catalog::all() {
                let params: Vec<String> = definition
                    .parameters
                    .iter()
                    .map(|p| {
                        let marker = if p.required { "" } else { "?" };
                        format!("{}{marker}:{}", p.name, p.param_type.as_str())
                    })
                    .collect();
                println!(
                    "  {:<20} {}{}",
                    definition.action_type.as_str(),
                    definition.description,
                    if definition.reversible { "" } else { " (irreversible)" }
                );
                println!("  {:<20} params: {}", "", params.join(", "));
                if !definition.requirements.is_empty() {
                    println!("  {:<20} requires: {}", "", serde_json::to_string(definition.requirements)?);
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

pub async fn cmd_status(config: &AppConfig) -> Result<()> {
    let stores = open_stores(config).await?;

    println!();
    println!("  flowpilot status");
    println!("  ================");
    println!();
    println!("  Database:         {} (schema v{})", config.database.path.display(), stores.db.schema_version().await?);
    println!(
        "  Triggers:         {} total, {} active",
        stores.triggers.count().await?,
        stores.triggers.list_active().await?.len()
    );

    let counts = stores.executions.count_by_status().await?;
    if counts.is_empty() {
        println!("  Executions:       none");
    } else {
        let summary: Vec<String> = counts.iter().map(|(status, n)| format!("{status}={n}")).collect();
        println!("  Executions:       {}", summary.join(", "));
    }

    match &config.llm.api_key {
        Some(_) => println!("  Text generation:  {} ({})", config.llm.provider, config.llm.model),
        None => println!("  Text generation:  disabled (no API key)"),
    }
    println!();
    Ok(())
}
