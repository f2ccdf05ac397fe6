//! Workflow command handlers

use crate::cli::context::{parse_id, parse_json_arg, print_json, read_document, CliContext};
use crate::cli::workflow::WorkflowCommands;
use anyhow::Result;
use bizflow_core::models::{Actor, NewWorkflow, TaskDefinition, TemplateConfig, Workflow};
use bizflow_core::workflow::WorkflowDetails;

pub async fn handle_workflow_commands(command: WorkflowCommands, ctx: &CliContext) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let engine = orchestrator.engine();

    match command {
        WorkflowCommands::Create {
            name,
            template,
            tasks,
            initiator,
            data,
            description,
            workflow_type,
            json,
        } => {
            let mut new = match template {
                Some(template_id) => {
                    NewWorkflow::from_template(ctx.company, parse_id(&template_id)?, &name, initiator)
                }
                None => NewWorkflow::ad_hoc(ctx.company, &name, initiator),
            };
            if let Some(data) = parse_json_arg(data)? {
                new = new.with_data(data);
            }
            new.description = description;
            new.workflow_type = workflow_type;

            // Ad hoc tasks are read before anything is written
            let definitions = match &tasks {
                Some(path) => read_document::<TemplateConfig>(path)?.tasks,
                None => Vec::new(),
            };

            let workflow = engine.create_workflow(new).await?;
            for definition in definitions {
                engine.add_task(workflow.id, definition).await?;
            }
            let details = engine.get_workflow(workflow.id)?;

            if json {
                print_json(&details)?;
            } else {
                println!("✅ Created workflow '{}'", details.workflow.name);
                print_details(&details);
            }
        }
        WorkflowCommands::AddTask {
            workflow_id,
            file,
            json,
        } => {
            let definition: TaskDefinition = read_document(&file)?;
            let task = engine.add_task(parse_id(&workflow_id)?, definition).await?;
            if json {
                print_json(&task)?;
            } else {
                println!("✅ Added task '{}' ({})", task.key, task.id);
            }
        }
        WorkflowCommands::Start {
            workflow_id,
            user,
            json,
        } => {
            let workflow = engine.start(parse_id(&workflow_id)?, Actor::User(user)).await?;
            if json {
                print_json(&workflow)?;
            } else {
                println!("▶️  Started workflow '{}'", workflow.name);
                print_workflow(&workflow);
            }
        }
        WorkflowCommands::Pause { workflow_id, user } => {
            let workflow = engine.pause(parse_id(&workflow_id)?, Actor::User(user)).await?;
            println!("⏸️  Paused workflow '{}'", workflow.name);
        }
        WorkflowCommands::Resume { workflow_id, user } => {
            let workflow = engine.resume(parse_id(&workflow_id)?, Actor::User(user)).await?;
            println!("▶️  Resumed workflow '{}'", workflow.name);
        }
        WorkflowCommands::Cancel {
            workflow_id,
            user,
            reason,
        } => {
            let workflow = engine
                .cancel(parse_id(&workflow_id)?, Actor::User(user), &reason)
                .await?;
            println!("🛑 Workflow '{}' is {}", workflow.name, workflow.status);
        }
        WorkflowCommands::Get { workflow_id, json } => {
            let details = engine.get_workflow(parse_id(&workflow_id)?)?;
            if json {
                print_json(&details)?;
            } else {
                print_details(&details);
                if !details.logs.is_empty() {
                    println!("\nHistory:");
                    for log in &details.logs {
                        println!(
                            "  {} {} ({})",
                            log.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            log.event_description,
                            log.actor
                        );
                    }
                }
            }
        }
        WorkflowCommands::List { status, json } => {
            let workflows = engine.list_workflows(ctx.company, status);
            if json {
                print_json(&workflows)?;
            } else if workflows.is_empty() {
                println!("No workflows found");
            } else {
                println!("📋 Workflows ({})", workflows.len());
                for workflow in &workflows {
                    println!(
                        "  {} {:<10} {:>6.2}% {}",
                        workflow.id,
                        workflow.status.as_str(),
                        workflow.progress_percentage,
                        workflow.name
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_workflow(workflow: &Workflow) {
    println!("ID:       {}", workflow.id);
    println!("Name:     {}", workflow.name);
    println!("Status:   {}", workflow.status);
    println!("Progress: {:.2}%", workflow.progress_percentage);
    if let Some(due) = workflow.due_date {
        println!("Due:      {}", due.format("%Y-%m-%d %H:%M"));
    }
}

fn print_details(details: &WorkflowDetails) {
    print_workflow(&details.workflow);
    if details.tasks.is_empty() {
        return;
    }
    println!("\nTasks:");
    for task in &details.tasks {
        let assignee = task
            .assigned_to
            .map(|user| format!(" -> {}", user))
            .unwrap_or_default();
        println!(
            "  [{}] {} {:<12} {}{}",
            task.step_number,
            task.id,
            task.status.as_str(),
            task.key,
            assignee
        );
    }
}
