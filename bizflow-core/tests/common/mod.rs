//! Shared fakes for integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use bizflow_core::models::{
    ApprovalLevel, ApprovalRuleDraft, CompanyId, EngineConfiguration, NewWorkflow,
    TaskDefinition, TaskKind, TemplateConfig, TemplateDraft, UserId, WorkflowSettings,
    WorkflowTask,
};
use bizflow_core::workflow::WorkflowEngine;
use bizflow_core::services::{
    ActionHandler, ActionOutcome, ActionRequest, DeliveryReport, Directory, HandlerRegistry,
    Notification, Notifier,
};
use bizflow_core::BizflowOrchestrator;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use std::time::Duration;

pub const COMPANY: CompanyId = 1;
pub const INITIATOR: UserId = 100;

/// Group membership held in memory
#[derive(Default)]
pub struct FakeDirectory {
    pub groups: BTreeMap<String, Vec<UserId>>,
    pub admins: Vec<UserId>,
}

impl FakeDirectory {
    pub fn with_group(mut self, group: &str, members: &[UserId]) -> Self {
        self.groups.insert(group.to_string(), members.to_vec());
        self
    }

    pub fn with_admin(mut self, user: UserId) -> Self {
        self.admins.push(user);
        self
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn resolve_assignee(&self, _company_id: CompanyId, group: &str) -> Result<Option<UserId>> {
        Ok(self.groups.get(group).and_then(|m| m.first().copied()))
    }

    async fn is_member(&self, _company_id: CompanyId, user_id: UserId, group: &str) -> Result<bool> {
        Ok(self.groups.get(group).is_some_and(|m| m.contains(&user_id)))
    }

    async fn is_admin(&self, _company_id: CompanyId, user_id: UserId) -> Result<bool> {
        Ok(self.admins.contains(&user_id))
    }
}

/// Records every notification; listed users never receive anything
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub unreachable: HashSet<UserId>,
}

impl RecordingNotifier {
    pub fn unreachable(users: &[UserId]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            unreachable: users.iter().copied().collect(),
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<DeliveryReport> {
        self.sent.lock().unwrap().push(notification.clone());
        let (failed, delivered): (Vec<UserId>, Vec<UserId>) = notification
            .recipients
            .iter()
            .copied()
            .partition(|user| self.unreachable.contains(user));
        Ok(DeliveryReport { delivered, failed })
    }
}

/// Counts calls; fails while `failing` is set, reports partial while `partial` is set;
/// sleeps `delay` before answering
#[derive(Default)]
pub struct CountingHandler {
    pub calls: AtomicUsize,
    pub failing: std::sync::atomic::AtomicBool,
    pub partial: std::sync::atomic::AtomicBool,
    pub delay: Duration,
    pub requests: Mutex<Vec<ActionRequest>>,
}

impl CountingHandler {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let handler = Self::default();
        handler.failing.store(true, Ordering::SeqCst);
        handler
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionHandler for CountingHandler {
    async fn run(&self, request: &ActionRequest) -> Result<ActionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("downstream system unavailable");
        }
        Ok(ActionOutcome {
            output: serde_json::json!({ "handled": request.handler }),
            partial: self.partial.load(Ordering::SeqCst),
        })
    }
}

pub struct Harness {
    pub orchestrator: BizflowOrchestrator,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_config() -> EngineConfiguration {
    EngineConfiguration {
        lock_timeout_ms: 200,
        collaborator_timeout_seconds: 2,
        ..EngineConfiguration::default()
    }
}

pub fn harness(directory: FakeDirectory) -> Harness {
    harness_with(directory, RecordingNotifier::default())
}

pub fn harness_with(directory: FakeDirectory, notifier: RecordingNotifier) -> Harness {
    let notifier = Arc::new(notifier);
    let orchestrator = BizflowOrchestrator::in_memory(
        &test_config(),
        Arc::new(directory),
        notifier.clone(),
        HandlerRegistry::new(),
    );
    Harness {
        orchestrator,
        notifier,
    }
}

pub fn review(key: &str, step: u32) -> TaskDefinition {
    TaskDefinition::new(
        key,
        step,
        TaskKind::Review {
            checklist: Vec::new(),
        },
    )
}

pub fn expense_approval(key: &str, step: u32) -> TaskDefinition {
    TaskDefinition::new(
        key,
        step,
        TaskKind::Approval {
            approval_type: Some("expense".to_string()),
            amount: None,
            amount_field: Some("amount".to_string()),
            category: None,
        },
    )
}

pub fn level(level: u32, role: &str, min_amount: Option<i64>) -> ApprovalLevel {
    ApprovalLevel {
        level,
        role: role.to_string(),
        min_amount: min_amount.map(Decimal::from),
    }
}

pub fn expense_rule(levels: Vec<ApprovalLevel>, auto_approve_below: Option<i64>) -> ApprovalRuleDraft {
    ApprovalRuleDraft {
        company_id: COMPANY,
        name: "Expenses".to_string(),
        description: None,
        approval_type: "expense".to_string(),
        categories: Vec::new(),
        approval_levels: levels,
        min_amount: Decimal::ZERO,
        max_amount: None,
        requires_documentation: false,
        workflow_template_id: None,
        auto_approve_threshold: auto_approve_below.map(Decimal::from),
        escalation_timeout: 24,
        created_by: INITIATOR,
    }
}

pub fn template_draft(name: &str, tasks: Vec<TaskDefinition>) -> TemplateDraft {
    TemplateDraft {
        company_id: COMPANY,
        name: name.to_string(),
        description: None,
        category: Some("Finance".to_string()),
        template_config: TemplateConfig { tasks },
        default_settings: WorkflowSettings::default(),
        data_schema: None,
        requires_approval: false,
        auto_start: false,
        created_by: INITIATOR,
    }
}

/// Draft ad hoc workflow holding the given tasks
pub async fn ad_hoc_workflow(
    engine: &WorkflowEngine,
    data: serde_json::Value,
    tasks: Vec<TaskDefinition>,
) -> Uuid {
    let workflow = engine
        .create_workflow(NewWorkflow::ad_hoc(COMPANY, "Ad hoc", INITIATOR).with_data(data))
        .await
        .unwrap();
    for task in tasks {
        engine.add_task(workflow.id, task).await.unwrap();
    }
    workflow.id
}

pub fn task_by_key(engine: &WorkflowEngine, workflow_id: Uuid, key: &str) -> WorkflowTask {
    engine
        .get_workflow(workflow_id)
        .unwrap()
        .tasks
        .into_iter()
        .find(|t| t.key == key)
        .unwrap()
}
