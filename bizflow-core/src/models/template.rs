//! Workflow template data models
//!
//! A template is a versioned blueprint: an ordered graph of task definitions plus the
//! settings new workflows start with. Task definitions are a typed tagged union, so an
//! unknown task type is rejected when the template is loaded.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::workflow::{CompanyId, Priority, TaskType, UserId, WorkflowSettings};
use crate::workflow::conditions::Condition;

/// Stored, versioned workflow template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Identifier of this version
    pub id: Uuid,
    /// Shared by every version of the same template
    pub lineage_id: Uuid,
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// e.g. `HR`, `Finance`, `Procurement`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Starts at 1, incremented by every revision
    pub version: u32,
    pub template_config: TemplateConfig,
    #[serde(default)]
    pub default_settings: WorkflowSettings,
    /// JSON Schema the workflow payload must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_schema: Option<serde_json::Value>,
    pub is_active: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub auto_start: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Input for creating or revising a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub template_config: TemplateConfig,
    #[serde(default)]
    pub default_settings: WorkflowSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub auto_start: bool,
    pub created_by: UserId,
}

/// Task graph of a template
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemplateConfig {
    pub tasks: Vec<TaskDefinition>,
}

/// One task of a template or ad hoc workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Identifier unique within the template
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rank in the partial order
    pub step: u32,
    /// Keys of tasks that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Due date offset from instantiation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_in_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<UserId>,
    /// Role or group the task is routed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_role: Option<String>,
    /// Resolve a concrete user from `assigned_role`
    #[serde(default)]
    pub auto_assign: bool,
    #[serde(default)]
    pub auto_complete: bool,
    #[serde(default = "default_true")]
    pub notification_enabled: bool,
    /// Rejection skips this branch instead of failing the workflow
    #[serde(default)]
    pub optional: bool,
    #[serde(flatten)]
    pub kind: TaskKind,
}

fn default_true() -> bool {
    true
}

/// Type-specific task configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Approval {
        /// Routes through the approval router when set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approval_type: Option<String>,
        /// Fixed amount
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<Decimal>,
        /// Read the amount from this workflow data field
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Review {
        #[serde(default)]
        checklist: Vec<String>,
    },
    DataEntry {
        /// Keys `result_data` must contain on completion
        #[serde(default)]
        required_fields: Vec<String>,
    },
    Notification {
        #[serde(default)]
        recipients: Vec<UserId>,
        subject: String,
        #[serde(default)]
        body: String,
    },
    Automated {
        /// Registered action handler name
        handler: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
    Conditional {
        /// All must hold against the workflow data
        conditions: Vec<Condition>,
    },
}

impl TaskKind {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskKind::Approval { .. } => TaskType::Approval,
            TaskKind::Review { .. } => TaskType::Review,
            TaskKind::DataEntry { .. } => TaskType::DataEntry,
            TaskKind::Notification { .. } => TaskType::Notification,
            TaskKind::Automated { .. } => TaskType::Automated,
            TaskKind::Conditional { .. } => TaskType::Conditional,
        }
    }
}

impl TaskDefinition {
    /// Minimal definition, mostly for ad hoc workflows and tests
    pub fn new(key: &str, step: u32, kind: TaskKind) -> Self {
        Self {
            key: key.to_string(),
            name: key.to_string(),
            description: None,
            step,
            depends_on: Vec::new(),
            priority: Priority::default(),
            due_in_days: None,
            estimated_duration_minutes: None,
            assigned_to: None,
            assigned_role: None,
            auto_assign: false,
            auto_complete: false,
            notification_enabled: true,
            optional: false,
            kind,
        }
    }

    pub fn depends_on(mut self, keys: &[&str]) -> Self {
        self.depends_on = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn assigned_to(mut self, user_id: UserId) -> Self {
        self.assigned_to = Some(user_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_definition_from_yaml() {
        let yaml = r#"
tasks:
  - key: submit
    name: Submit expense
    step: 1
    type: data_entry
    required_fields: [amount, reason]
  - key: approve
    name: Manager approval
    step: 2
    depends_on: [submit]
    type: approval
    approval_type: expense
    amount_field: amount
    due_in_days: 3
"#;
        let config: TemplateConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[0].kind.task_type(), TaskType::DataEntry);
        assert!(config.tasks[0].notification_enabled);
        assert_eq!(config.tasks[1].depends_on, vec!["submit".to_string()]);
        match &config.tasks[1].kind {
            TaskKind::Approval {
                approval_type,
                amount_field,
                ..
            } => {
                assert_eq!(approval_type.as_deref(), Some("expense"));
                assert_eq!(amount_field.as_deref(), Some("amount"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_task_type_rejected_at_load() {
        let json = serde_json::json!({
            "key": "x",
            "name": "X",
            "step": 1,
            "type": "manual"
        });
        assert!(serde_json::from_value::<TaskDefinition>(json).is_err());
    }

    #[test]
    fn test_task_kind_tagged_serialization() {
        let def = TaskDefinition::new(
            "notify",
            1,
            TaskKind::Notification {
                recipients: vec![3],
                subject: "Heads up".to_string(),
                body: String::new(),
            },
        );
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["recipients"], serde_json::json!([3]));
    }
}
