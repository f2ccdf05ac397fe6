//! Automation CLI commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum AutomationCommands {
    /// Configure an automation from a YAML or JSON draft
    Configure {
        /// Automation draft file
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List the company's automations
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run an automation now, ignoring its schedule
    Run {
        /// Automation ID (UUID)
        automation_id: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show recent executions, newest first
    History {
        /// Automation ID (UUID)
        automation_id: String,

        /// Maximum number of executions to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Re-enable an automation and reset its failure streak
    Enable {
        /// Automation ID (UUID)
        automation_id: String,
    },

    /// Disable an automation
    Disable {
        /// Automation ID (UUID)
        automation_id: String,
    },
}
