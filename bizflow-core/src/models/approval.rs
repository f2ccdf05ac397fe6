//! Approval routing configuration models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::workflow::{CompanyId, UserId};

/// Per-company approval routing rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: Uuid,
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// e.g. `expense`, `purchase_order`, `leave_request`
    pub approval_type: String,
    /// Categories the rule applies to; empty means any
    #[serde(default)]
    pub categories: Vec<String>,
    /// Ordered approver levels
    pub approval_levels: Vec<ApprovalLevel>,
    pub min_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub requires_documentation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_template_id: Option<Uuid>,
    pub is_active: bool,
    /// Amounts at or below this are approved by the system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve_threshold: Option<Decimal>,
    /// Hours before an open approval task escalates
    pub escalation_timeout: u32,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    pub fn covers_amount(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.is_none_or(|max| amount <= max)
    }

    pub fn admits_category(&self, category: Option<&str>) -> bool {
        if self.categories.is_empty() {
            return true;
        }
        category.is_some_and(|c| self.categories.iter().any(|allowed| allowed == c))
    }
}

/// One approver level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalLevel {
    /// Position in the chain, strictly increasing
    pub level: u32,
    /// Role that must approve
    pub role: String,
    /// Level applies only from this amount upwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Decimal>,
}

/// Input for configuring an approval rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRuleDraft {
    pub company_id: CompanyId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub approval_type: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub approval_levels: Vec<ApprovalLevel>,
    #[serde(default)]
    pub min_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub requires_documentation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_template_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve_threshold: Option<Decimal>,
    #[serde(default = "default_escalation_timeout")]
    pub escalation_timeout: u32,
    pub created_by: UserId,
}

fn default_escalation_timeout() -> u32 {
    72
}

/// Outcome of resolving an approval chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalChain {
    pub approval_workflow_id: Uuid,
    /// Required approver levels; empty when auto-approved
    pub levels: Vec<ApprovalLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve_threshold: Option<Decimal>,
    pub escalation_timeout: u32,
}

impl ApprovalChain {
    pub fn is_auto_approved(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn roles(&self) -> Vec<&str> {
        self.levels.iter().map(|l| l.role.as_str()).collect()
    }
}
