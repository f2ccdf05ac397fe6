//! Workflow CLI commands

use bizflow_core::models::WorkflowStatus;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// Create a workflow from a template or ad hoc
    Create {
        /// Workflow name
        name: String,

        /// Instantiate from this template version (UUID)
        #[arg(short, long)]
        template: Option<String>,

        /// Ad hoc task definitions (`tasks:` list in YAML or JSON)
        #[arg(long, conflicts_with = "template")]
        tasks: Option<PathBuf>,

        /// Initiating user
        #[arg(short, long)]
        initiator: u64,

        /// Workflow payload as inline JSON
        #[arg(short, long)]
        data: Option<String>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,

        /// Business category, e.g. expense_approval
        #[arg(long = "type")]
        workflow_type: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Append a task to a draft workflow
    AddTask {
        /// Workflow ID (UUID)
        workflow_id: String,

        /// Task definition file (`.yaml`, `.yml` or `.json`)
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Start a draft workflow
    Start {
        /// Workflow ID (UUID)
        workflow_id: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Pause an active workflow
    Pause {
        /// Workflow ID (UUID)
        workflow_id: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,
    },

    /// Resume a paused workflow
    Resume {
        /// Workflow ID (UUID)
        workflow_id: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,
    },

    /// Cancel a workflow and its open tasks
    Cancel {
        /// Workflow ID (UUID)
        workflow_id: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,

        /// Reason recorded in the workflow history
        #[arg(short, long, default_value = "cancelled from the command line")]
        reason: String,
    },

    /// Show a workflow with its tasks and history
    Get {
        /// Workflow ID (UUID)
        workflow_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List the company's workflows
    List {
        /// Filter by status (draft, active, paused, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<WorkflowStatus>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}
