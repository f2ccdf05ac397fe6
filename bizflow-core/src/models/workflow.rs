//! Workflow instance, task and audit data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::approval::ApprovalLevel;
use crate::models::template::TaskKind;

/// Opaque reference to a user owned by the identity system
pub type UserId = u64;

/// Opaque reference to a tenant company
pub type CompanyId = u64;

/// Who performed an action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// A human user
    User(UserId),
    /// The engine itself (auto-approval, automatic tasks, sweeps)
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user {}", id),
            Actor::System => write!(f, "system"),
        }
    }
}

/// A user acting on a task, optionally with the administrator override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Performer {
    pub user_id: UserId,
    pub admin_override: bool,
}

impl Performer {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            admin_override: false,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            admin_override: true,
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::User(self.user_id)
    }
}

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, tasks may still be added
    Draft,
    /// Running; tasks are being worked
    Active,
    /// Temporarily halted by an operator
    Paused,
    /// Every countable task completed
    Completed,
    /// A required task was rejected
    Failed,
    /// Cancelled by an operator
    Cancelled,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 6] = [
        WorkflowStatus::Draft,
        WorkflowStatus::Active,
        WorkflowStatus::Paused,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
        WorkflowStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Allowed edges of the workflow state machine
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Draft, Cancelled)
                | (Active, Paused)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Cancelled)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown workflow status '{}'", s))
    }
}

/// Task status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or for the workflow to start
    Pending,
    /// Actionable
    InProgress,
    /// Done
    Completed,
    /// Rejected by a reviewer or approver
    Rejected,
    /// Cancelled or skipped
    Cancelled,
    /// Past its due date; still actionable
    Overdue,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Rejected,
        TaskStatus::Cancelled,
        TaskStatus::Overdue,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Rejected | TaskStatus::Cancelled
        )
    }

    /// Whether a performer can act on the task now
    pub fn is_actionable(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Overdue)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{}'", s))
    }
}

/// Kind of work a task represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Approval,
    Review,
    DataEntry,
    Notification,
    Automated,
    Conditional,
}

impl TaskType {
    /// Task types that may be rejected
    pub fn is_rejectable(&self) -> bool {
        matches!(self, TaskType::Approval | TaskType::Review)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Approval => "approval",
            TaskType::Review => "review",
            TaskType::DataEntry => "data_entry",
            TaskType::Notification => "notification",
            TaskType::Automated => "automated",
            TaskType::Conditional => "conditional",
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Per-workflow policy
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WorkflowSettings {
    /// Keep running when a task is rejected
    #[serde(default)]
    pub continue_on_rejection: bool,
    /// Workflow due date offset applied at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_in_days: Option<u32>,
}

/// Running workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier
    pub id: Uuid,
    /// Owning company
    pub company_id: CompanyId,
    /// Template this workflow was instantiated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    /// Template version at instantiation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_version: Option<u32>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Business category, e.g. `expense_approval`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
    pub status: WorkflowStatus,
    /// Lowest step rank that still has open work
    pub current_step: u32,
    /// Completed share of countable tasks, 0..=100
    pub progress_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Estimated duration in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<u32>,
    /// Caller-supplied payload
    #[serde(default)]
    pub workflow_data: serde_json::Value,
    #[serde(default)]
    pub settings: WorkflowSettings,
    pub initiated_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub company_id: CompanyId,
    /// Instantiate tasks from this template version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<u32>,
    #[serde(default)]
    pub workflow_data: serde_json::Value,
    pub initiated_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    /// Replaces the template's default settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<WorkflowSettings>,
}

impl NewWorkflow {
    pub fn ad_hoc(company_id: CompanyId, name: &str, initiated_by: UserId) -> Self {
        Self {
            company_id,
            template_id: None,
            name: name.to_string(),
            description: None,
            workflow_type: None,
            due_date: None,
            estimated_duration: None,
            workflow_data: serde_json::Value::Object(Default::default()),
            initiated_by,
            assigned_to: None,
            settings: None,
        }
    }

    pub fn from_template(
        company_id: CompanyId,
        template_id: Uuid,
        name: &str,
        initiated_by: UserId,
    ) -> Self {
        Self {
            template_id: Some(template_id),
            ..Self::ad_hoc(company_id, name, initiated_by)
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.workflow_data = data;
        self
    }
}

/// Target of a task assignment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    User(UserId),
    /// A group or role; resolved to a user when the task auto-assigns
    Group(String),
}

/// Approval progress of an approval task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalProgress {
    /// Rule that produced the chain
    pub approval_workflow_id: Uuid,
    /// Required approver levels, in order
    pub chain: Vec<ApprovalLevel>,
    /// Number of levels already approved
    pub approved_levels: usize,
    /// Hours an open approval may wait before it escalates
    pub escalation_timeout: u32,
}

impl ApprovalProgress {
    pub fn current_level(&self) -> Option<&ApprovalLevel> {
        self.chain.get(self.approved_levels)
    }

    pub fn is_satisfied(&self) -> bool {
        self.approved_levels >= self.chain.len()
    }
}

/// Task within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Definition key, unique within the workflow
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub task_type: TaskType,
    /// Rank in the partial order; parallel branches may share a rank
    pub step_number: u32,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    /// Role or department the task is routed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Typed task configuration copied from the definition
    pub task_config: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<serde_json::Value>,
    /// Tasks that must complete before this one starts
    #[serde(default)]
    pub depends_on_tasks: Vec<Uuid>,
    /// Tasks waiting on this one
    #[serde(default)]
    pub blocks_tasks: Vec<Uuid>,
    #[serde(default)]
    pub auto_assign: bool,
    #[serde(default)]
    pub auto_complete: bool,
    #[serde(default = "default_true")]
    pub notification_enabled: bool,
    /// Rejection does not fail the workflow
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl WorkflowTask {
    /// Due date has passed and the task is still open
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => !self.status.is_terminal() && now > due,
            None => false,
        }
    }

    /// Handled by the engine without a human performer
    ///
    /// `auto_complete` never bypasses a non-empty approval chain.
    pub fn runs_automatically(&self) -> bool {
        match self.task_type {
            TaskType::Notification | TaskType::Automated | TaskType::Conditional => true,
            TaskType::Approval => match &self.approval {
                Some(progress) => progress.chain.is_empty(),
                None => self.auto_complete,
            },
            TaskType::Review | TaskType::DataEntry => self.auto_complete,
        }
    }
}

/// Action kinds recorded against a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Approve,
    Reject,
    Comment,
    Complete,
    Assign,
    Escalate,
}

/// Immutable record of one action on one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAction {
    pub id: Uuid,
    pub task_id: Uuid,
    pub workflow_id: Uuid,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub performed_by: Actor,
    pub performed_at: DateTime<Utc>,
}

/// Workflow-level event kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowCreated,
    WorkflowStarted,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    TaskAdded,
    TaskStarted,
    TaskAssigned,
    TaskApproved,
    TaskCompleted,
    TaskRejected,
    TaskCancelled,
    TaskOverdue,
    TaskEscalated,
}

/// Immutable record of a workflow-level event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub company_id: CompanyId,
    pub event_type: WorkflowEvent,
    pub event_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<serde_json::Value>,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}
