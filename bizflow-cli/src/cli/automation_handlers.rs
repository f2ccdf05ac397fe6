//! Automation command handlers

use crate::cli::automation::AutomationCommands;
use crate::cli::context::{parse_id, print_json, read_document, CliContext};
use anyhow::Result;
use bizflow_core::models::{AutomationDraft, AutomationExecution, ProcessAutomation};

pub async fn handle_automation_commands(
    command: AutomationCommands,
    ctx: &CliContext,
) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let scheduler = orchestrator.scheduler();

    match command {
        AutomationCommands::Configure { file, json } => {
            let draft: AutomationDraft = read_document(&file)?;
            let automation = scheduler.configure(draft)?;
            if json {
                print_json(&automation)?;
            } else {
                println!("✅ Configured automation '{}'", automation.name);
                print_automation(&automation);
            }
        }
        AutomationCommands::List { json } => {
            let automations = scheduler.list(ctx.company);
            if json {
                print_json(&automations)?;
            } else if automations.is_empty() {
                println!("No automations configured");
            } else {
                println!("⚙️  Automations ({})", automations.len());
                for automation in &automations {
                    println!(
                        "  {} {:<12} {:>3} runs {:>6.1}% ok {}{}",
                        automation.id,
                        format!("{:?}", automation.automation_type()).to_lowercase(),
                        automation.run_count,
                        automation.success_rate(),
                        automation.name,
                        if automation.is_active { "" } else { " (disabled)" }
                    );
                }
            }
        }
        AutomationCommands::Run {
            automation_id,
            user,
            json,
        } => {
            let execution = scheduler.run_now(parse_id(&automation_id)?, user).await?;
            if json {
                print_json(&execution)?;
            } else {
                print_execution(&execution);
            }
        }
        AutomationCommands::History {
            automation_id,
            limit,
            json,
        } => {
            let executions = scheduler.history(parse_id(&automation_id)?, limit)?;
            if json {
                print_json(&executions)?;
            } else if executions.is_empty() {
                println!("No executions recorded");
            } else {
                for execution in &executions {
                    print_execution(execution);
                }
            }
        }
        AutomationCommands::Enable { automation_id } => {
            let automation = scheduler.set_active(parse_id(&automation_id)?, true)?;
            println!("✅ Enabled automation '{}'", automation.name);
            if let Some(next) = automation.next_run {
                println!("Next run: {}", next.format("%Y-%m-%d %H:%M"));
            }
        }
        AutomationCommands::Disable { automation_id } => {
            let automation = scheduler.set_active(parse_id(&automation_id)?, false)?;
            println!("✅ Disabled automation '{}'", automation.name);
        }
    }

    Ok(())
}

fn print_automation(automation: &ProcessAutomation) {
    println!("ID:       {}", automation.id);
    println!("Name:     {}", automation.name);
    println!("Type:     {:?}", automation.automation_type());
    println!("Active:   {}", automation.is_active);
    if let Some(next) = automation.next_run {
        println!("Next run: {}", next.format("%Y-%m-%d %H:%M"));
    }
    println!(
        "Retries:  {} attempts, {}s initial delay",
        automation.retry_config.max_attempts, automation.retry_config.initial_delay_seconds
    );
}

fn print_execution(execution: &AutomationExecution) {
    println!(
        "  {} {:?} attempt {} in {}ms",
        execution.start_time.format("%Y-%m-%d %H:%M:%S"),
        execution.execution_status,
        execution.attempt,
        execution.duration_ms
    );
    if let Some(error) = &execution.error_details {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        println!("    error: {}", message);
    }
}
