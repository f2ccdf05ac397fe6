mod cli;

use anyhow::Result;
use bizflow_core::services::logging;
use bizflow_core::EngineError;
use clap::{Parser, Subcommand};
use cli::approval::ApprovalCommands;
use cli::automation::AutomationCommands;
use cli::context::CliContext;
use cli::handlers;
use cli::task::TaskCommands;
use cli::template::TemplateCommands;
use cli::workflow::WorkflowCommands;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bizflow")]
#[command(version)]
#[command(about = "Business process automation: templates, workflows, approvals and scheduled automations")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Configuration file (default: <config dir>/bizflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Company the command operates on
    #[arg(long, global = true, default_value_t = 1)]
    company: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage versioned workflow templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Create and drive workflow instances
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Act on workflow tasks
    ///
    /// Examples:
    ///   bizflow task mine --user 7
    ///   bizflow task complete <TASK_ID> --user 7 --data '{"receipt": "r-42"}'
    ///   bizflow task approve <TASK_ID> --user 10 --comments "ok"
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Configure approval rules and resolve approver chains
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Configure and run process automations
    Automation {
        #[command(subcommand)]
        command: AutomationCommands,
    },

    /// Show workflow and task statistics
    Stats {
        /// Include the dashboard of this user
        #[arg(short, long)]
        user: Option<u64>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run the automation scheduler
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommands,
    },

    /// Show or initialize the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum SchedulerCommands {
    /// Poll in the foreground until Ctrl+C
    Run,

    /// Run a single pass: overdue sweep, automatic tasks, due automations
    Tick {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file
    Init {
        /// Store file to use
        #[arg(long)]
        store: Option<PathBuf>,

        /// Overwrite existing values with defaults
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        match e.downcast_ref::<EngineError>() {
            Some(engine_error) => {
                let report = engine_error.report();
                eprintln!("Error [{}]: {}", report.kind.as_str(), report.message);
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = CliContext::load(cli.config, cli.company)?;
    if !matches!(cli.command, Commands::Config { .. }) {
        logging::init_logging(ctx.config.log_level)
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    }

    match cli.command {
        Commands::Template { command } => {
            cli::template_handlers::handle_template_commands(command, &ctx).await?;
        }
        Commands::Workflow { command } => {
            cli::workflow_handlers::handle_workflow_commands(command, &ctx).await?;
        }
        Commands::Task { command } => {
            cli::task_handlers::handle_task_commands(command, &ctx).await?;
        }
        Commands::Approval { command } => {
            cli::approval_handlers::handle_approval_commands(command, &ctx).await?;
        }
        Commands::Automation { command } => {
            cli::automation_handlers::handle_automation_commands(command, &ctx).await?;
        }
        Commands::Stats { user, json } => {
            handlers::handle_stats(&ctx, user, json).await?;
        }
        Commands::Scheduler { command } => match command {
            SchedulerCommands::Run => handlers::handle_scheduler_run(&ctx).await?,
            SchedulerCommands::Tick { json } => handlers::handle_scheduler_tick(&ctx, json).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { json } => handlers::handle_config_show(&ctx, json).await?,
            ConfigCommands::Init { store, force } => {
                handlers::handle_config_init(&ctx, store, force).await?
            }
        },
    }

    Ok(())
}
