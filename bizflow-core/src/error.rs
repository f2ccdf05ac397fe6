//! Engine error taxonomy
//!
//! Every rejected operation reports the kind of failure together with the entity it
//! concerns, so callers can render a structured response without parsing messages.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{CompanyId, UserId};

/// Result alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Reference to the entity an error is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Template(Uuid),
    Workflow(Uuid),
    Task(Uuid),
    ApprovalRule(Uuid),
    Automation(Uuid),
    Execution(Uuid),
    Company(CompanyId),
    User(UserId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Template(id) => write!(f, "template {}", id),
            EntityRef::Workflow(id) => write!(f, "workflow {}", id),
            EntityRef::Task(id) => write!(f, "task {}", id),
            EntityRef::ApprovalRule(id) => write!(f, "approval rule {}", id),
            EntityRef::Automation(id) => write!(f, "automation {}", id),
            EntityRef::Execution(id) => write!(f, "execution {}", id),
            EntityRef::Company(id) => write!(f, "company {}", id),
            EntityRef::User(id) => write!(f, "user {}", id),
        }
    }
}

/// Failure kinds reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTemplate,
    InvalidState,
    DependencyNotSatisfied,
    NotAssigned,
    NoApprovalRule,
    AutomationExecution,
    LockContention,
    NotFound,
    Validation,
    CollaboratorTimeout,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTemplate => "invalid_template",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::DependencyNotSatisfied => "dependency_not_satisfied",
            ErrorKind::NotAssigned => "not_assigned",
            ErrorKind::NoApprovalRule => "no_approval_rule",
            ErrorKind::AutomationExecution => "automation_execution",
            ErrorKind::LockContention => "lock_contention",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::CollaboratorTimeout => "collaborator_timeout",
            ErrorKind::Storage => "storage",
        }
    }
}

/// Errors produced by engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid template ({entity}): {reason}")]
    InvalidTemplate { entity: EntityRef, reason: String },

    #[error("cannot {operation} {entity} while it is {current}")]
    InvalidState {
        entity: EntityRef,
        current: String,
        operation: String,
    },

    #[error("{entity} has unfinished dependencies: {}", format_ids(.pending))]
    DependencyNotSatisfied { entity: EntityRef, pending: Vec<Uuid> },

    #[error("{performer} is not assigned to {entity}")]
    NotAssigned { entity: EntityRef, performer: String },

    #[error("no approval rule for '{approval_type}' amount {amount} ({entity})")]
    NoApprovalRule {
        entity: EntityRef,
        approval_type: String,
        amount: Decimal,
    },

    #[error("automation failed ({entity}): {message}")]
    AutomationExecution { entity: EntityRef, message: String },

    #[error("{entity} is locked by another operation")]
    LockContention { entity: EntityRef },

    #[error("{entity} not found")]
    NotFound { entity: EntityRef },

    #[error("validation failed ({entity}): {reason}")]
    Validation { entity: EntityRef, reason: String },

    #[error("{collaborator} timed out after {seconds}s ({entity})")]
    CollaboratorTimeout {
        entity: EntityRef,
        collaborator: String,
        seconds: u64,
    },

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

fn format_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serializable form of an error for callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    pub message: String,
    pub retryable: bool,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidTemplate { .. } => ErrorKind::InvalidTemplate,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::DependencyNotSatisfied { .. } => ErrorKind::DependencyNotSatisfied,
            EngineError::NotAssigned { .. } => ErrorKind::NotAssigned,
            EngineError::NoApprovalRule { .. } => ErrorKind::NoApprovalRule,
            EngineError::AutomationExecution { .. } => ErrorKind::AutomationExecution,
            EngineError::LockContention { .. } => ErrorKind::LockContention,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Validation { .. } => ErrorKind::Validation,
            EngineError::CollaboratorTimeout { .. } => ErrorKind::CollaboratorTimeout,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Entity the error concerns, if any
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            EngineError::InvalidTemplate { entity, .. }
            | EngineError::InvalidState { entity, .. }
            | EngineError::DependencyNotSatisfied { entity, .. }
            | EngineError::NotAssigned { entity, .. }
            | EngineError::NoApprovalRule { entity, .. }
            | EngineError::AutomationExecution { entity, .. }
            | EngineError::LockContention { entity }
            | EngineError::NotFound { entity }
            | EngineError::Validation { entity, .. }
            | EngineError::CollaboratorTimeout { entity, .. } => Some(entity),
            EngineError::Storage(_) => None,
        }
    }

    /// Transient failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::LockContention { .. } | EngineError::CollaboratorTimeout { .. }
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            entity: self.entity().cloned(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }

    pub(crate) fn invalid_state(
        entity: EntityRef,
        current: impl fmt::Display,
        operation: &str,
    ) -> Self {
        EngineError::InvalidState {
            entity,
            current: current.to_string(),
            operation: operation.to_string(),
        }
    }

    pub(crate) fn validation(entity: EntityRef, reason: impl Into<String>) -> Self {
        EngineError::Validation {
            entity,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: EntityRef) -> Self {
        EngineError::NotFound { entity }
    }
}
