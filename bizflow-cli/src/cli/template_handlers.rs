//! Template command handlers

use crate::cli::context::{parse_id, print_json, read_document, CliContext};
use crate::cli::template::TemplateCommands;
use anyhow::Result;
use bizflow_core::models::{TemplateDraft, WorkflowTemplate};

pub async fn handle_template_commands(command: TemplateCommands, ctx: &CliContext) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let templates = orchestrator.templates();

    match command {
        TemplateCommands::Create { file, json } => {
            let draft: TemplateDraft = read_document(&file)?;
            let template = templates.create(draft)?;
            if json {
                print_json(&template)?;
            } else {
                println!("✅ Created template '{}'", template.name);
                print_template(&template);
            }
        }
        TemplateCommands::Revise {
            template_id,
            file,
            json,
        } => {
            let draft: TemplateDraft = read_document(&file)?;
            let template = templates.revise(parse_id(&template_id)?, draft)?;
            if json {
                print_json(&template)?;
            } else {
                println!(
                    "✅ Published version {} of '{}'",
                    template.version, template.name
                );
                print_template(&template);
            }
        }
        TemplateCommands::List { json } => {
            let list = templates.list(ctx.company);
            if json {
                print_json(&list)?;
            } else if list.is_empty() {
                println!("No templates for company {}", ctx.company);
            } else {
                println!("📋 Templates ({})", list.len());
                for template in &list {
                    println!(
                        "  {} {} v{}{}",
                        template.id,
                        template.name,
                        template.version,
                        if template.is_active { "" } else { " (inactive)" }
                    );
                }
            }
        }
        TemplateCommands::Get { template_id, json } => {
            let template = templates.get(parse_id(&template_id)?)?;
            if json {
                print_json(&template)?;
            } else {
                print_template(&template);
                for task in &template.template_config.tasks {
                    let deps = if task.depends_on.is_empty() {
                        String::new()
                    } else {
                        format!(" after {}", task.depends_on.join(", "))
                    };
                    println!(
                        "  [{}] {} ({}){}",
                        task.step,
                        task.key,
                        task.kind.task_type().as_str(),
                        deps
                    );
                }
            }
        }
        TemplateCommands::Versions { lineage_id, json } => {
            let versions = templates.versions(parse_id(&lineage_id)?);
            if json {
                print_json(&versions)?;
            } else {
                for template in &versions {
                    println!(
                        "  v{} {} {}",
                        template.version,
                        template.id,
                        template.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        TemplateCommands::Deactivate { template_id } => {
            let template_id = parse_id(&template_id)?;
            templates.deactivate(template_id)?;
            println!("✅ Deactivated template {}", template_id);
        }
    }

    Ok(())
}

fn print_template(template: &WorkflowTemplate) {
    println!("ID:       {}", template.id);
    println!("Lineage:  {}", template.lineage_id);
    println!("Name:     {}", template.name);
    println!("Version:  {}", template.version);
    if let Some(category) = &template.category {
        println!("Category: {}", category);
    }
    println!("Active:   {}", template.is_active);
    println!("Tasks:    {}", template.template_config.tasks.len());
}
