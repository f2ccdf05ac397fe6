//! Task CLI commands

use bizflow_core::models::TaskStatus;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Assign a task to a user or a group
    Assign {
        /// Task ID (UUID)
        task_id: String,

        /// Assignee user
        #[arg(long, conflicts_with = "group", required_unless_present = "group")]
        to: Option<u64>,

        /// Assignee group or role
        #[arg(long)]
        group: Option<String>,

        /// Acting user
        #[arg(short, long)]
        user: u64,
    },

    /// Complete an in-progress task
    Complete {
        /// Task ID (UUID)
        task_id: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,

        /// Act with the administrator override
        #[arg(long)]
        admin: bool,

        /// Result data as inline JSON
        #[arg(short, long)]
        data: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Approve the current level of an approval task
    Approve {
        /// Task ID (UUID)
        task_id: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,

        /// Act with the administrator override
        #[arg(long)]
        admin: bool,

        /// Approver comments
        #[arg(short, long)]
        comments: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Reject an approval or review task
    Reject {
        /// Task ID (UUID)
        task_id: String,

        /// Rejection reason
        #[arg(short, long)]
        reason: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,

        /// Act with the administrator override
        #[arg(long)]
        admin: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Add a comment to a task
    Comment {
        /// Task ID (UUID)
        task_id: String,

        /// Comment text
        text: String,

        /// Acting user
        #[arg(short, long)]
        user: u64,
    },

    /// Show one task
    Get {
        /// Task ID (UUID)
        task_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the audit trail of a task
    Actions {
        /// Task ID (UUID)
        task_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List tasks assigned to a user
    Mine {
        /// User whose tasks to list
        #[arg(short, long)]
        user: u64,

        /// Filter by status (pending, in_progress, completed, rejected, cancelled, overdue)
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}
