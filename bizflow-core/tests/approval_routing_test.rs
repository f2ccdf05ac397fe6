//! Approval routing, multi-level approval and overdue escalation tests

mod common;

use bizflow_core::models::{
    ActionType, Actor, Performer, TaskDefinition, TaskKind, TaskStatus, WorkflowEvent,
    WorkflowStatus,
};
use bizflow_core::ErrorKind;
use chrono::{Duration, Utc};
use common::*;

fn approvers() -> FakeDirectory {
    FakeDirectory::default()
        .with_group("manager", &[10])
        .with_group("finance", &[20])
        .with_group("ops", &[7])
        .with_admin(99)
}

/// Amounts under the threshold are approved by the system without a chain
#[tokio::test]
async fn test_auto_approval_below_threshold() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    h.orchestrator
        .approvals()
        .configure(expense_rule(vec![level(1, "manager", None)], Some(100)))
        .unwrap();

    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({ "amount": 50 }),
        vec![expense_approval("approve", 1)],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let task = task_by_key(&engine, wf, "approve");
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.approval.unwrap().chain.is_empty());

    let actions = engine.task_actions(task.id).unwrap();
    let approve = actions
        .iter()
        .find(|a| a.action_type == ActionType::Approve)
        .unwrap();
    assert_eq!(approve.performed_by, Actor::System);
    assert_eq!(approve.action_data.as_ref().unwrap()["auto_approved"], true);
    assert_eq!(
        engine.get_workflow(wf).unwrap().workflow.status,
        WorkflowStatus::Completed
    );
}

/// Without a matching rule the workflow refuses to start and stays untouched
#[tokio::test]
async fn test_missing_rule_blocks_start() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({ "amount": 500 }),
        vec![review("prepare", 1), expense_approval("approve", 2).depends_on(&["prepare"])],
    )
    .await;

    let err = engine.start(wf, Actor::User(INITIATOR)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoApprovalRule);

    let details = engine.get_workflow(wf).unwrap();
    assert_eq!(details.workflow.status, WorkflowStatus::Draft);
    assert!(details.workflow.started_at.is_none());
    assert!(details.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    assert!(details.tasks.iter().all(|t| t.approval.is_none()));
}

/// The routed amount must be readable from the workflow data
#[tokio::test]
async fn test_unreadable_amount_blocks_start() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    h.orchestrator
        .approvals()
        .configure(expense_rule(vec![level(1, "manager", None)], None))
        .unwrap();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({ "amount": "a lot" }),
        vec![expense_approval("approve", 1)],
    )
    .await;

    let err = engine.start(wf, Actor::User(INITIATOR)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        engine.get_workflow(wf).unwrap().workflow.status,
        WorkflowStatus::Draft
    );
}

/// Each level must be approved by its role, in order
#[tokio::test]
async fn test_multi_level_approval() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    h.orchestrator
        .approvals()
        .configure(expense_rule(
            vec![level(1, "manager", None), level(2, "finance", Some(1000))],
            None,
        ))
        .unwrap();

    let before = Utc::now();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({ "amount": 5000 }),
        vec![expense_approval("approve", 1)],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let task = task_by_key(&engine, wf, "approve");
    assert_eq!(task.status, TaskStatus::InProgress);
    let progress = task.approval.clone().unwrap();
    assert_eq!(progress.chain.len(), 2);
    let due = task.due_date.unwrap();
    assert!(due >= before + Duration::hours(24));

    let err = engine.approve(task.id, None, Performer::user(20)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAssigned);

    let err = engine
        .complete(task.id, None, Performer::user(INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let after_first = engine
        .approve(task.id, Some("ok for me".to_string()), Performer::user(10))
        .await
        .unwrap();
    assert_eq!(after_first.status, TaskStatus::InProgress);
    assert_eq!(after_first.approval.unwrap().approved_levels, 1);

    let done = engine.approve(task.id, None, Performer::user(20)).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let approvals = engine
        .task_actions(task.id)
        .unwrap()
        .into_iter()
        .filter(|a| a.action_type == ActionType::Approve)
        .count();
    assert_eq!(approvals, 2);
    assert_eq!(
        engine.get_workflow(wf).unwrap().workflow.status,
        WorkflowStatus::Completed
    );
}

/// Levels with a minimum amount drop out for smaller requests
#[tokio::test]
async fn test_small_amount_skips_upper_level() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    h.orchestrator
        .approvals()
        .configure(expense_rule(
            vec![level(1, "manager", None), level(2, "finance", Some(1000))],
            None,
        ))
        .unwrap();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({ "amount": 500 }),
        vec![expense_approval("approve", 1)],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let task = task_by_key(&engine, wf, "approve");
    assert_eq!(task.approval.unwrap().chain.len(), 1);
    let done = engine.approve(task.id, None, Performer::user(10)).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

/// Verified administrators may approve on anyone's behalf
#[tokio::test]
async fn test_admin_override_approval() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    h.orchestrator
        .approvals()
        .configure(expense_rule(vec![level(1, "manager", None)], None))
        .unwrap();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({ "amount": 300 }),
        vec![expense_approval("approve", 1)],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    let task = task_by_key(&engine, wf, "approve");

    let err = engine.approve(task.id, None, Performer::admin(20)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAssigned);

    let done = engine.approve(task.id, None, Performer::admin(99)).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

/// An approver's rejection fails the workflow
#[tokio::test]
async fn test_approver_rejection() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    h.orchestrator
        .approvals()
        .configure(expense_rule(vec![level(1, "manager", None)], None))
        .unwrap();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({ "amount": 300 }),
        vec![
            expense_approval("approve", 1),
            review("book", 2).depends_on(&["approve"]),
        ],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    let task = task_by_key(&engine, wf, "approve");

    let err = engine
        .reject(task.id, "no receipt", Performer::user(20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAssigned);

    engine
        .reject(task.id, "no receipt", Performer::user(10))
        .await
        .unwrap();
    let details = engine.get_workflow(wf).unwrap();
    assert_eq!(details.workflow.status, WorkflowStatus::Failed);
    assert_eq!(task_by_key(&engine, wf, "book").status, TaskStatus::Cancelled);
    assert!(details
        .logs
        .iter()
        .any(|l| l.event_type == WorkflowEvent::TaskRejected));
}

/// Past-due tasks are escalated once, reassigned to their group and announced
#[tokio::test]
async fn test_overdue_sweep_escalates() {
    let h = harness(approvers());
    let engine = h.orchestrator.engine();
    let mut form = TaskDefinition::new(
        "form",
        1,
        TaskKind::DataEntry {
            required_fields: Vec::new(),
        },
    )
    .assigned_to(5);
    form.due_in_days = Some(1);
    form.assigned_role = Some("ops".to_string());

    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![form.clone()]).await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let paused = ad_hoc_workflow(&engine, serde_json::json!({}), vec![form]).await;
    engine.start(paused, Actor::User(INITIATOR)).await.unwrap();
    engine.pause(paused, Actor::User(INITIATOR)).await.unwrap();

    let later = Utc::now() + Duration::days(2);
    let report = engine.sweep_overdue(later).await;
    assert_eq!(report.overdue, 1);
    assert_eq!(report.reassigned, 1);
    assert_eq!(report.skipped_workflows, 0);

    let task = task_by_key(&engine, wf, "form");
    assert_eq!(task.status, TaskStatus::Overdue);
    assert_eq!(task.assigned_to, Some(7));
    assert_eq!(task_by_key(&engine, paused, "form").status, TaskStatus::InProgress);

    let escalation = engine
        .task_actions(task.id)
        .unwrap()
        .into_iter()
        .find(|a| a.action_type == ActionType::Escalate)
        .unwrap();
    assert_eq!(escalation.performed_by, Actor::System);
    assert_eq!(escalation.action_data.unwrap()["previous_assignee"], 5);

    let logs = engine.get_workflow(wf).unwrap().logs;
    assert!(logs.iter().any(|l| l.event_type == WorkflowEvent::TaskOverdue));
    assert!(logs.iter().any(|l| l.event_type == WorkflowEvent::TaskEscalated));

    let overdue_notice = h
        .notifier
        .sent()
        .into_iter()
        .find(|n| n.subject.starts_with("Overdue"))
        .unwrap();
    assert!(overdue_notice.recipients.contains(&7));
    assert!(overdue_notice.recipients.contains(&INITIATOR));

    assert_eq!(engine.sweep_overdue(later).await.overdue, 0);

    let done = engine.complete(task.id, None, Performer::user(7)).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}
