//! Task command handlers

use crate::cli::context::{parse_id, parse_json_arg, performer, print_json, CliContext};
use crate::cli::task::TaskCommands;
use anyhow::Result;
use bizflow_core::models::{Actor, Assignment, WorkflowTask};

pub async fn handle_task_commands(command: TaskCommands, ctx: &CliContext) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let engine = orchestrator.engine();

    match command {
        TaskCommands::Assign {
            task_id,
            to,
            group,
            user,
        } => {
            let target = match (to, group) {
                (Some(assignee), _) => Assignment::User(assignee),
                (None, Some(group)) => Assignment::Group(group),
                (None, None) => anyhow::bail!("Either --to or --group is required"),
            };
            let task = engine
                .assign(parse_id(&task_id)?, target, Actor::User(user))
                .await?;
            match task.assigned_to {
                Some(assignee) => println!("✅ Task '{}' assigned to {}", task.key, assignee),
                None => println!(
                    "✅ Task '{}' routed to group {}",
                    task.key,
                    task.assigned_group.as_deref().unwrap_or("-")
                ),
            }
        }
        TaskCommands::Complete {
            task_id,
            user,
            admin,
            data,
            json,
        } => {
            let result_data = parse_json_arg(data)?;
            let task = engine
                .complete(parse_id(&task_id)?, result_data, performer(user, admin))
                .await?;
            report_task(&task, "Completed", json)?;
        }
        TaskCommands::Approve {
            task_id,
            user,
            admin,
            comments,
            json,
        } => {
            let task = engine
                .approve(parse_id(&task_id)?, comments, performer(user, admin))
                .await?;
            report_task(&task, "Approved", json)?;
        }
        TaskCommands::Reject {
            task_id,
            reason,
            user,
            admin,
            json,
        } => {
            let task = engine
                .reject(parse_id(&task_id)?, &reason, performer(user, admin))
                .await?;
            report_task(&task, "Rejected", json)?;
        }
        TaskCommands::Comment {
            task_id,
            text,
            user,
        } => {
            engine
                .comment(parse_id(&task_id)?, &text, Actor::User(user))
                .await?;
            println!("💬 Comment added");
        }
        TaskCommands::Get { task_id, json } => {
            let task = engine.get_task(parse_id(&task_id)?)?;
            if json {
                print_json(&task)?;
            } else {
                print_task(&task);
            }
        }
        TaskCommands::Actions { task_id, json } => {
            let actions = engine.task_actions(parse_id(&task_id)?)?;
            if json {
                print_json(&actions)?;
            } else if actions.is_empty() {
                println!("No actions recorded");
            } else {
                for action in &actions {
                    println!(
                        "  {} {:?} by {}{}",
                        action.performed_at.format("%Y-%m-%d %H:%M:%S"),
                        action.action_type,
                        action.performed_by,
                        action
                            .comments
                            .as_ref()
                            .map(|c| format!(": {}", c))
                            .unwrap_or_default()
                    );
                }
            }
        }
        TaskCommands::Mine { user, status, json } => {
            let tasks = engine.list_my_tasks(ctx.company, user, status);
            if json {
                print_json(&tasks)?;
            } else if tasks.is_empty() {
                println!("No tasks assigned to {}", user);
            } else {
                println!("📋 Tasks for {} ({})", user, tasks.len());
                for task in &tasks {
                    let due = task
                        .due_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {} {:<12} {:<10} {}",
                        task.id,
                        task.status.as_str(),
                        due,
                        task.name
                    );
                }
            }
        }
    }

    Ok(())
}

fn report_task(task: &WorkflowTask, verb: &str, json: bool) -> Result<()> {
    if json {
        print_json(task)
    } else {
        println!("✅ {} task '{}'", verb, task.key);
        print_task(task);
        Ok(())
    }
}

fn print_task(task: &WorkflowTask) {
    println!("ID:       {}", task.id);
    println!("Workflow: {}", task.workflow_id);
    println!("Key:      {}", task.key);
    println!("Type:     {}", task.task_type.as_str());
    println!("Status:   {}", task.status);
    if let Some(assignee) = task.assigned_to {
        println!("Assignee: {}", assignee);
    }
    if let Some(approval) = &task.approval {
        println!(
            "Approval: {}/{} levels",
            approval.approved_levels,
            approval.chain.len()
        );
    }
    if let Some(due) = task.due_date {
        println!("Due:      {}", due.format("%Y-%m-%d %H:%M"));
    }
}
