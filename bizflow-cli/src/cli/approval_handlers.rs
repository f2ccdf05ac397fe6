//! Approval routing command handlers

use crate::cli::approval::ApprovalCommands;
use crate::cli::context::{parse_id, print_json, read_document, CliContext};
use anyhow::Result;
use bizflow_core::models::{ApprovalLevel, ApprovalRuleDraft};

pub async fn handle_approval_commands(command: ApprovalCommands, ctx: &CliContext) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let approvals = orchestrator.approvals();

    match command {
        ApprovalCommands::Configure { file, json } => {
            let draft: ApprovalRuleDraft = read_document(&file)?;
            let rule = approvals.configure(draft)?;
            if json {
                print_json(&rule)?;
            } else {
                println!(
                    "✅ Configured approval rule '{}' ({})",
                    rule.name, rule.id
                );
                print_levels(&rule.approval_levels);
            }
        }
        ApprovalCommands::List {
            approval_type,
            json,
        } => {
            let rules = approvals.list(ctx.company, approval_type.as_deref());
            if json {
                print_json(&rules)?;
            } else if rules.is_empty() {
                println!("No approval rules configured");
            } else {
                for rule in &rules {
                    let max = rule
                        .max_amount
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "∞".to_string());
                    println!(
                        "  {} {} [{}] {}..{}{}",
                        rule.id,
                        rule.name,
                        rule.approval_type,
                        rule.min_amount,
                        max,
                        if rule.is_active { "" } else { " (inactive)" }
                    );
                }
            }
        }
        ApprovalCommands::Resolve {
            approval_type,
            amount,
            category,
            json,
        } => {
            let chain =
                approvals.resolve_chain(ctx.company, &approval_type, amount, category.as_deref())?;
            if json {
                print_json(&chain)?;
            } else if chain.is_auto_approved() {
                println!("✅ {} {} is approved automatically", approval_type, amount);
            } else {
                println!(
                    "🔗 {} {} routes through {} level(s), escalating after {}h",
                    approval_type,
                    amount,
                    chain.levels.len(),
                    chain.escalation_timeout
                );
                print_levels(&chain.levels);
            }
        }
        ApprovalCommands::Enable { rule_id } => {
            let rule = approvals.set_active(parse_id(&rule_id)?, true)?;
            println!("✅ Enabled approval rule '{}'", rule.name);
        }
        ApprovalCommands::Disable { rule_id } => {
            let rule = approvals.set_active(parse_id(&rule_id)?, false)?;
            println!("✅ Disabled approval rule '{}'", rule.name);
        }
    }

    Ok(())
}

fn print_levels(levels: &[ApprovalLevel]) {
    for level in levels {
        match level.min_amount {
            Some(min) => println!("  {}. {} (from {})", level.level, level.role, min),
            None => println!("  {}. {}", level.level, level.role),
        }
    }
}
