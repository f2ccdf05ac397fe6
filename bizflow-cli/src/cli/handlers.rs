//! Configuration, statistics and scheduler handlers

use crate::cli::context::{print_json, CliContext};
use anyhow::{Context, Result};
use bizflow_core::models::{EngineConfiguration, TaskStatus, WorkflowStatus};
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::watch;

/// Print the effective configuration
pub async fn handle_config_show(ctx: &CliContext, json: bool) -> Result<()> {
    if json {
        return print_json(&ctx.config);
    }
    println!("📄 Config file: {}", ctx.config_path.display());
    if !ctx.config_path.exists() {
        println!("   (not found, showing defaults)");
    }
    println!("Store:               {}", ctx.config.store_path.display());
    println!("Log level:           {}", ctx.config.log_level.as_str());
    println!("Poll interval:       {}s", ctx.config.poll_interval_seconds);
    println!("Worker pool:         {}", ctx.config.worker_pool_size);
    println!("Lock timeout:        {}ms", ctx.config.lock_timeout_ms);
    println!(
        "Collaborator timeout: {}s",
        ctx.config.collaborator_timeout_seconds
    );
    println!(
        "Conditional cooldown: {}min",
        ctx.config.conditional_cooldown_minutes
    );
    println!("Directory groups:    {}", ctx.config.directory.groups.len());

    if let Err(errors) = ctx.config.validate() {
        println!("\n⚠️  Invalid configuration:");
        for error in errors {
            println!("  - {}", error);
        }
    }
    Ok(())
}

/// Write a configuration file, keeping existing values when it already exists
pub async fn handle_config_init(
    ctx: &CliContext,
    store: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let path = &ctx.config_path;
    let mut config = if path.exists() && !force {
        println!("⚠️  Configuration file already exists. Keeping existing values...");
        ctx.config.clone()
    } else {
        EngineConfiguration::default()
    };
    if let Some(store) = store {
        config.store_path = store;
    }
    if let Err(errors) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", errors.join("; "));
    }

    config
        .save_to_file(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✅ Configuration written to {}", path.display());
    println!("   Store: {}", config.store_path.display());
    Ok(())
}

/// Workflow and task counts, weekly activity and, with a user, their dashboard
pub async fn handle_stats(ctx: &CliContext, user: Option<u64>, json: bool) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let engine = orchestrator.engine();
    let now = Utc::now();

    let workflows = engine.workflow_stats_by_status(ctx.company);
    let tasks = engine.task_stats_by_status(ctx.company);
    let weekly = engine.weekly_workflow_activity(ctx.company, now);
    let dashboard = user.map(|user| engine.dashboard(ctx.company, user, now));

    if json {
        return print_json(&serde_json::json!({
            "workflows_by_status": workflows,
            "tasks_by_status": tasks,
            "weekly_activity": weekly,
            "dashboard": dashboard,
        }));
    }

    println!("📊 Company {}", ctx.company);
    println!("\nWorkflows:");
    for status in WorkflowStatus::ALL {
        println!("  {:<12} {}", status.as_str(), workflows.get(&status).unwrap_or(&0));
    }
    println!("\nTasks:");
    for status in TaskStatus::ALL {
        println!("  {:<12} {}", status.as_str(), tasks.get(&status).unwrap_or(&0));
    }
    println!("\nCreated in the last 7 days:");
    for day in &weekly {
        println!("  {} {}", day.date.format("%a %Y-%m-%d"), day.created);
    }

    if let Some(dashboard) = dashboard {
        println!("\nDashboard:");
        println!("  Total workflows:    {}", dashboard.total_workflows);
        println!("  Active workflows:   {}", dashboard.active_workflows);
        println!("  Pending tasks:      {}", dashboard.pending_tasks.len());
        println!("  Overdue tasks:      {}", dashboard.overdue_tasks);
        println!("  Active automations: {}", dashboard.active_automations);
        for workflow in &dashboard.recent_workflows {
            println!("  · {} ({})", workflow.name, workflow.status);
        }
    }
    Ok(())
}

/// Run one scheduler pass and print what it did
pub async fn handle_scheduler_tick(ctx: &CliContext, json: bool) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let report = orchestrator.scheduler().tick(Utc::now()).await;
    if json {
        print_json(&report)?;
    } else {
        println!(
            "⏱️  executed {} skipped {} disabled {} overdue {} drained {}",
            report.executed, report.skipped, report.disabled, report.overdue, report.drained
        );
    }
    Ok(())
}

/// Run the scheduler in the foreground until Ctrl+C
pub async fn handle_scheduler_run(ctx: &CliContext) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let scheduler = orchestrator.scheduler();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    println!(
        "⏱️  Scheduler polling every {}s with {} workers. Press Ctrl+C to stop.",
        ctx.config.poll_interval_seconds, ctx.config.worker_pool_size
    );

    let runner = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!("\n🛑 Stopping scheduler...");
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    runner.await.context("Scheduler task failed")?;
    Ok(())
}
