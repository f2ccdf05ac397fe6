//! Process automation data models

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::workflow::{CompanyId, UserId, WorkflowEvent};
use crate::workflow::conditions::Condition;

/// Automation kind, derived from the trigger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutomationType {
    Scheduled,
    Triggered,
    Conditional,
}

/// What makes an automation fire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Fires when `next_run` is reached
    Scheduled { schedule: ScheduleConfig },
    /// Fires when matching workflow events were logged since the last run
    Triggered {
        events: Vec<WorkflowEvent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_type: Option<String>,
    },
    /// Fires while the trigger conditions hold, at most once per cooldown
    Conditional {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cooldown_minutes: Option<u32>,
    },
}

impl TriggerConfig {
    pub fn automation_type(&self) -> AutomationType {
        match self {
            TriggerConfig::Scheduled { .. } => AutomationType::Scheduled,
            TriggerConfig::Triggered { .. } => AutomationType::Triggered,
            TriggerConfig::Conditional { .. } => AutomationType::Conditional,
        }
    }
}

/// Calendar schedule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "every", rename_all = "snake_case")]
pub enum ScheduleConfig {
    Interval { minutes: u32 },
    Hourly { minute: u32 },
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
    /// Days past the end of a month clamp to its last day
    Monthly { day: u32, hour: u32, minute: u32 },
}

/// What an automation does when it fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionConfig {
    /// Instantiate a workflow from a template
    CreateWorkflow {
        template_id: Uuid,
        name: String,
        #[serde(default)]
        workflow_data: serde_json::Value,
        #[serde(default)]
        start: bool,
        initiated_by: UserId,
    },
    /// Notify users through the notifier
    SendNotification {
        recipients: Vec<UserId>,
        subject: String,
        #[serde(default)]
        body: String,
    },
    /// Call an external HTTP endpoint
    Webhook {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
    /// Run a registered action handler
    Custom { handler: String },
}

fn default_method() -> String {
    "POST".to_string()
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of consecutive failed attempts (1-10)
    pub max_attempts: u32,
    /// Delay before first retry in seconds (1-300)
    pub initial_delay_seconds: u32,
    /// Whether to use exponential backoff
    #[serde(default)]
    pub exponential_backoff: bool,
    /// Multiplier for exponential backoff (1.0-10.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_seconds: 60,
            exponential_backoff: true,
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Stored automation definition and its counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessAutomation {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: TriggerConfig,
    /// All must hold for the automation to fire
    #[serde(default)]
    pub trigger_conditions: Vec<Condition>,
    pub action: ActionConfig,
    /// Merged into the execution input
    #[serde(default)]
    pub action_parameters: serde_json::Value,
    /// Workflow whose lifecycle bounds this automation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    /// Failures since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Set while a scheduler executes it; lapses so a run lost mid-flight is retried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_until: Option<DateTime<Utc>>,
    pub retry_config: RetryPolicy,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessAutomation {
    pub fn automation_type(&self) -> AutomationType {
        self.trigger.automation_type()
    }

    /// Share of successful runs, 0.0 to 100.0
    pub fn success_rate(&self) -> f64 {
        if self.run_count == 0 {
            return 0.0;
        }
        (self.success_count as f64 / self.run_count as f64) * 100.0
    }
}

/// Input for configuring an automation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationDraft {
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub trigger_conditions: Vec<Condition>,
    pub action: ActionConfig,
    #[serde(default)]
    pub action_parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// Falls back to the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryPolicy>,
    pub created_by: UserId,
}

/// Outcome of one automation run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    /// The action reported partial delivery
    Partial,
    /// Finished after its workflow became terminal; result dropped
    Discarded,
}

/// What caused a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Schedule,
    Event,
    Condition,
    Manual { user_id: UserId },
}

/// Record of one automation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationExecution {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub execution_status: ExecutionStatus,
    /// Consecutive attempt number, 1-based
    pub attempt: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub input_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
    pub triggered_by: TriggerSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_context: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_value(serde_json::json!({
            "max_attempts": 3,
            "initial_delay_seconds": 5
        }))
        .unwrap();

        assert_eq!(policy.backoff_multiplier, 2.0);
        assert!(!policy.exponential_backoff);
    }

    #[test]
    fn test_trigger_config_from_yaml() {
        let yaml = r#"
type: scheduled
schedule:
  every: weekly
  weekday: Mon
  hour: 9
  minute: 30
"#;
        let trigger: TriggerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(trigger.automation_type(), AutomationType::Scheduled);
        assert_eq!(
            trigger,
            TriggerConfig::Scheduled {
                schedule: ScheduleConfig::Weekly {
                    weekday: Weekday::Mon,
                    hour: 9,
                    minute: 30
                }
            }
        );
    }

    #[test]
    fn test_webhook_action_defaults_to_post() {
        let action: ActionConfig = serde_json::from_value(serde_json::json!({
            "action": "webhook",
            "url": "https://hooks.example.com/flow"
        }))
        .unwrap();

        match action {
            ActionConfig::Webhook { method, headers, .. } => {
                assert_eq!(method, "POST");
                assert!(headers.is_empty());
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_manual_trigger_source_serialization() {
        let json = serde_json::to_value(TriggerSource::Manual { user_id: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"manual": {"user_id": 4}}));
    }
}
