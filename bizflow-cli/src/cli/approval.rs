//! Approval routing CLI commands

use clap::Subcommand;
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// Configure an approval rule from a YAML or JSON draft
    Configure {
        /// Approval rule draft file
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List the company's approval rules
    List {
        /// Only rules of this approval type
        #[arg(short = 't', long = "type")]
        approval_type: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the approver chain a request would be routed to
    Resolve {
        /// Approval type, e.g. expense
        approval_type: String,

        /// Requested amount
        amount: Decimal,

        /// Request category
        #[arg(short, long)]
        category: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Re-enable an approval rule
    Enable {
        /// Approval rule ID (UUID)
        rule_id: String,
    },

    /// Disable an approval rule
    Disable {
        /// Approval rule ID (UUID)
        rule_id: String,
    },
}
