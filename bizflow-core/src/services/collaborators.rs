//! External collaborators the engine consumes but does not own
//!
//! Directory lookups, notification delivery and action handlers all sit behind traits;
//! every call the engine makes through them is bounded by [`with_timeout`].

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{CompanyId, DirectoryConfig, UserId};

/// Identity and group membership lookups
#[async_trait]
pub trait Directory: Send + Sync {
    /// Pick one concrete user for a group or role
    async fn resolve_assignee(&self, company_id: CompanyId, group: &str) -> Result<Option<UserId>>;

    async fn is_member(&self, company_id: CompanyId, user_id: UserId, group: &str) -> Result<bool>;

    /// Whether the user may act with the administrator override
    async fn is_admin(&self, company_id: CompanyId, user_id: UserId) -> Result<bool>;
}

/// Message delivered to users
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub company_id: CompanyId,
    pub recipients: Vec<UserId>,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

/// Per-recipient delivery outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryReport {
    pub delivered: Vec<UserId>,
    pub failed: Vec<UserId>,
}

impl DeliveryReport {
    pub fn all(recipients: &[UserId]) -> Self {
        Self {
            delivered: recipients.to_vec(),
            failed: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && !self.delivered.is_empty()
    }

    pub fn is_total_failure(&self) -> bool {
        !self.failed.is_empty() && self.delivered.is_empty()
    }
}

/// Notification delivery (email, SMS, in-app)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<DeliveryReport>;
}

/// Input to an action handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub company_id: CompanyId,
    pub handler: String,
    pub parameters: serde_json::Value,
    /// Workflow data for task handlers, execution input for automations
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
}

/// Output of an action handler
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    pub output: serde_json::Value,
    /// Some of the work was not done
    #[serde(default)]
    pub partial: bool,
}

/// Named unit of automated work
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, request: &ActionRequest) -> Result<ActionOutcome>;
}

/// Registered action handlers by name
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Arc<dyn ActionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Run a collaborator call with a deadline
///
/// Expiry becomes a retryable [`EngineError::CollaboratorTimeout`]; a collaborator
/// error becomes [`EngineError::AutomationExecution`].
pub async fn with_timeout<T, F>(
    entity: EntityRef,
    collaborator: &str,
    limit: Duration,
    call: F,
) -> EngineResult<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(EngineError::AutomationExecution {
            entity,
            message: format!("{} failed: {:#}", collaborator, e),
        }),
        Err(_) => {
            tracing::warn!(
                collaborator = collaborator,
                entity = %entity,
                seconds = limit.as_secs(),
                "Collaborator call timed out"
            );
            Err(EngineError::CollaboratorTimeout {
                entity,
                collaborator: collaborator.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}

/// Directory backed by static configuration
pub struct StaticDirectory {
    config: DirectoryConfig,
}

impl StaticDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve_assignee(&self, _company_id: CompanyId, group: &str) -> Result<Option<UserId>> {
        Ok(self
            .config
            .groups
            .get(group)
            .and_then(|members| members.first().copied()))
    }

    async fn is_member(&self, _company_id: CompanyId, user_id: UserId, group: &str) -> Result<bool> {
        Ok(self
            .config
            .groups
            .get(group)
            .is_some_and(|members| members.contains(&user_id)))
    }

    async fn is_admin(&self, _company_id: CompanyId, user_id: UserId) -> Result<bool> {
        Ok(self.config.admins.contains(&user_id))
    }
}

/// Notifier that records deliveries in the log
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<DeliveryReport> {
        tracing::info!(
            company_id = notification.company_id,
            recipients = ?notification.recipients,
            subject = %notification.subject,
            workflow_id = notification.workflow_id.map(|id| id.to_string()).unwrap_or_default(),
            "Notification delivered"
        );
        Ok(DeliveryReport::all(&notification.recipients))
    }
}
