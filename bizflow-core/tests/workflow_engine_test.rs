//! Workflow lifecycle and task graph tests

mod common;

use bizflow_core::models::{
    ActionType, Actor, Assignment, NewWorkflow, Performer, TaskKind, TaskStatus, WorkflowEvent,
    WorkflowStatus,
};
use bizflow_core::ErrorKind;
use common::*;

fn data_entry(key: &str, step: u32, fields: &[&str]) -> bizflow_core::models::TaskDefinition {
    bizflow_core::models::TaskDefinition::new(
        key,
        step,
        TaskKind::DataEntry {
            required_fields: fields.iter().map(|f| f.to_string()).collect(),
        },
    )
}

/// Three parallel tasks move progress in thirds, then complete the workflow
#[tokio::test]
async fn test_parallel_tasks_progress() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({}),
        vec![review("a", 1), review("b", 1), review("c", 1)],
    )
    .await;

    let started = engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    assert_eq!(started.status, WorkflowStatus::Active);
    assert_eq!(started.progress_percentage, 0.0);
    assert!(started.started_at.is_some());

    let performer = Performer::user(INITIATOR);
    let mut seen = Vec::new();
    for key in ["a", "b", "c"] {
        let task = task_by_key(&engine, wf, key);
        assert_eq!(task.status, TaskStatus::InProgress);
        engine.complete(task.id, None, performer).await.unwrap();
        seen.push(engine.get_workflow(wf).unwrap().workflow.progress_percentage);
    }
    assert_eq!(seen, vec![33.33, 66.67, 100.0]);

    let details = engine.get_workflow(wf).unwrap();
    assert_eq!(details.workflow.status, WorkflowStatus::Completed);
    assert!(details.workflow.completed_at.is_some());
    assert!(details
        .logs
        .iter()
        .any(|l| l.event_type == WorkflowEvent::WorkflowCompleted));
}

/// A task with two upstream branches waits for both
#[tokio::test]
async fn test_diamond_graph_activation() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({}),
        vec![
            review("a", 1),
            review("b", 2).depends_on(&["a"]),
            review("c", 2).depends_on(&["a"]),
            review("d", 3).depends_on(&["b", "c"]),
        ],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    let performer = Performer::user(INITIATOR);

    let d = task_by_key(&engine, wf, "d");
    assert_eq!(d.status, TaskStatus::Pending);
    let err = engine.complete(d.id, None, performer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyNotSatisfied);

    engine
        .complete(task_by_key(&engine, wf, "a").id, None, performer)
        .await
        .unwrap();
    assert_eq!(task_by_key(&engine, wf, "b").status, TaskStatus::InProgress);
    assert_eq!(task_by_key(&engine, wf, "c").status, TaskStatus::InProgress);
    assert_eq!(engine.get_workflow(wf).unwrap().workflow.current_step, 2);

    engine
        .complete(task_by_key(&engine, wf, "b").id, None, performer)
        .await
        .unwrap();
    assert_eq!(task_by_key(&engine, wf, "d").status, TaskStatus::Pending);

    engine
        .complete(task_by_key(&engine, wf, "c").id, None, performer)
        .await
        .unwrap();
    let d = task_by_key(&engine, wf, "d");
    assert_eq!(d.status, TaskStatus::InProgress);
    assert_eq!(engine.get_workflow(wf).unwrap().workflow.current_step, 3);
}

/// Completing twice is rejected and leaves a single completion record
#[tokio::test]
async fn test_complete_twice_is_rejected() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![review("a", 1), review("b", 1)]).await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let a = task_by_key(&engine, wf, "a");
    engine.complete(a.id, None, Performer::user(INITIATOR)).await.unwrap();
    let err = engine
        .complete(a.id, None, Performer::user(INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let completions = engine
        .task_actions(a.id)
        .unwrap()
        .into_iter()
        .filter(|action| action.action_type == ActionType::Complete)
        .count();
    assert_eq!(completions, 1);
}

/// Parallel branches finish identically whichever completes first
#[tokio::test]
async fn test_completion_order_does_not_matter() {
    for order in [["b", "c"], ["c", "b"]] {
        let h = harness(FakeDirectory::default());
        let engine = h.orchestrator.engine();
        let wf = ad_hoc_workflow(
            &engine,
            serde_json::json!({}),
            vec![
                review("a", 1),
                review("b", 2).depends_on(&["a"]),
                review("c", 2).depends_on(&["a"]),
                review("d", 3).depends_on(&["b", "c"]),
            ],
        )
        .await;
        engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

        let performer = Performer::user(INITIATOR);
        for key in ["a", order[0], order[1], "d"] {
            engine
                .complete(task_by_key(&engine, wf, key).id, None, performer)
                .await
                .unwrap();
        }

        let details = engine.get_workflow(wf).unwrap();
        assert_eq!(details.workflow.status, WorkflowStatus::Completed);
        assert_eq!(details.workflow.progress_percentage, 100.0);
        let completions: usize = details
            .tasks
            .iter()
            .map(|t| {
                engine
                    .task_actions(t.id)
                    .unwrap()
                    .iter()
                    .filter(|a| a.action_type == ActionType::Complete)
                    .count()
            })
            .sum();
        assert_eq!(completions, 4);
    }
}

/// Paused workflows accept no task decisions until resumed
#[tokio::test]
async fn test_pause_blocks_completion() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![review("a", 1)]).await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let paused = engine.pause(wf, Actor::User(INITIATOR)).await.unwrap();
    assert_eq!(paused.status, WorkflowStatus::Paused);
    let err = engine.pause(wf, Actor::User(INITIATOR)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let a = task_by_key(&engine, wf, "a");
    let err = engine
        .complete(a.id, None, Performer::user(INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    engine.resume(wf, Actor::User(INITIATOR)).await.unwrap();
    engine.complete(a.id, None, Performer::user(INITIATOR)).await.unwrap();
    let details = engine.get_workflow(wf).unwrap();
    assert_eq!(details.workflow.status, WorkflowStatus::Completed);
    assert!(details
        .logs
        .iter()
        .any(|l| l.event_type == WorkflowEvent::WorkflowResumed));
}

/// Cancelling closes every open task; a second cancel changes nothing
#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({}),
        vec![review("a", 1), review("b", 2).depends_on(&["a"])],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let cancelled = engine
        .cancel(wf, Actor::User(INITIATOR), "budget frozen")
        .await
        .unwrap();
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    let details = engine.get_workflow(wf).unwrap();
    assert!(details.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
    let log_count = details.logs.len();

    let again = engine
        .cancel(wf, Actor::User(INITIATOR), "budget frozen")
        .await
        .unwrap();
    assert_eq!(again.status, WorkflowStatus::Cancelled);
    assert_eq!(engine.get_workflow(wf).unwrap().logs.len(), log_count);
}

/// Rejecting a required review fails the workflow
#[tokio::test]
async fn test_rejection_fails_workflow() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({}),
        vec![review("a", 1), review("b", 1)],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let a = task_by_key(&engine, wf, "a");
    let rejected = engine
        .reject(a.id, "numbers do not add up", Performer::user(INITIATOR))
        .await
        .unwrap();
    assert_eq!(rejected.status, TaskStatus::Rejected);

    let details = engine.get_workflow(wf).unwrap();
    assert_eq!(details.workflow.status, WorkflowStatus::Failed);
    assert_eq!(task_by_key(&engine, wf, "b").status, TaskStatus::Cancelled);
}

/// Rejecting the only open task fails the workflow instead of completing it
#[tokio::test]
async fn test_rejecting_last_open_task_fails_workflow() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![review("only", 1)]).await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let only = task_by_key(&engine, wf, "only");
    engine
        .reject(only.id, "wrong vendor", Performer::user(INITIATOR))
        .await
        .unwrap();

    let details = engine.get_workflow(wf).unwrap();
    assert_eq!(details.workflow.status, WorkflowStatus::Failed);
    assert!(details.workflow.completed_at.is_some());
    assert!(details
        .logs
        .iter()
        .any(|l| l.event_type == WorkflowEvent::WorkflowFailed));
    assert!(!details
        .logs
        .iter()
        .any(|l| l.event_type == WorkflowEvent::WorkflowCompleted));
}

/// Rejecting an optional task skips only its branch
#[tokio::test]
async fn test_optional_rejection_skips_branch() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let mut optional = review("a", 1);
    optional.optional = true;
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({}),
        vec![optional, review("b", 1), review("c", 2).depends_on(&["a"])],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let a = task_by_key(&engine, wf, "a");
    engine
        .reject(a.id, "not needed", Performer::user(INITIATOR))
        .await
        .unwrap();
    assert_eq!(task_by_key(&engine, wf, "c").status, TaskStatus::Cancelled);
    assert_eq!(
        engine.get_workflow(wf).unwrap().workflow.status,
        WorkflowStatus::Active
    );

    let b = task_by_key(&engine, wf, "b");
    engine.complete(b.id, None, Performer::user(INITIATOR)).await.unwrap();
    let workflow = engine.get_workflow(wf).unwrap().workflow;
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.progress_percentage, 100.0);
}

/// Only approval and review tasks can be rejected
#[tokio::test]
async fn test_reject_requires_decision_task() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![data_entry("form", 1, &[])]).await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();

    let form = task_by_key(&engine, wf, "form");
    let err = engine
        .reject(form.id, "no", Performer::user(INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

/// Assigned tasks accept only their assignee or a verified administrator
#[tokio::test]
async fn test_completion_requires_assignee_or_admin() {
    let h = harness(FakeDirectory::default().with_admin(9));
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({}),
        vec![review("a", 1).assigned_to(7), review("b", 1).assigned_to(7)],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    let a = task_by_key(&engine, wf, "a");

    let err = engine
        .complete(a.id, None, Performer::user(INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAssigned);

    let err = engine
        .complete(a.id, None, Performer::admin(INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAssigned);

    engine.complete(a.id, None, Performer::user(7)).await.unwrap();
    let b = task_by_key(&engine, wf, "b");
    engine.complete(b.id, None, Performer::admin(9)).await.unwrap();
    assert_eq!(
        engine.get_workflow(wf).unwrap().workflow.status,
        WorkflowStatus::Completed
    );
}

/// Data entry tasks demand their required fields
#[tokio::test]
async fn test_data_entry_required_fields() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(
        &engine,
        serde_json::json!({}),
        vec![data_entry("form", 1, &["amount", "reason"])],
    )
    .await;
    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    let form = task_by_key(&engine, wf, "form");

    let err = engine
        .complete(
            form.id,
            Some(serde_json::json!({ "amount": 120 })),
            Performer::user(INITIATOR),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("reason"));

    let done = engine
        .complete(
            form.id,
            Some(serde_json::json!({ "amount": 120, "reason": "team lunch" })),
            Performer::user(INITIATOR),
        )
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result_data.unwrap()["reason"], "team lunch");
}

/// Assignment records an action and notifies the new assignee
#[tokio::test]
async fn test_assign_notifies_assignee() {
    let h = harness(FakeDirectory::default().with_group("ops", &[31, 32]));
    let engine = h.orchestrator.engine();
    let mut grouped = review("b", 1);
    grouped.auto_assign = true;
    grouped.assigned_role = Some("ops".to_string());
    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![review("a", 1), grouped]).await;

    let b = task_by_key(&engine, wf, "b");
    assert_eq!(b.assigned_to, Some(31));

    let a = task_by_key(&engine, wf, "a");
    let assigned = engine
        .assign(a.id, Assignment::User(7), Actor::User(INITIATOR))
        .await
        .unwrap();
    assert_eq!(assigned.assigned_to, Some(7));

    let actions = engine.task_actions(a.id).unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action_type, ActionType::Assign);
    assert!(h
        .notifier
        .sent()
        .iter()
        .any(|n| n.recipients == vec![7] && n.task_id == Some(a.id)));

    let regrouped = engine
        .assign(b.id, Assignment::Group("ops".to_string()), Actor::User(INITIATOR))
        .await
        .unwrap();
    assert_eq!(regrouped.assigned_group.as_deref(), Some("ops"));
    assert_eq!(regrouped.assigned_to, Some(31));
}

/// Tasks can only be added while the workflow is a draft
#[tokio::test]
async fn test_add_task_rules() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![review("a", 1)]).await;

    let err = engine
        .add_task(wf, review("b", 2).depends_on(&["missing"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTemplate);

    let err = engine.add_task(wf, review("a", 2)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTemplate);

    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    let err = engine.add_task(wf, review("c", 2)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

/// Templates drive instantiation: versioning, auto start and company scoping
#[tokio::test]
async fn test_template_instantiation() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let templates = h.orchestrator.templates();

    let mut draft = template_draft("Expense claim", vec![review("a", 1)]);
    draft.auto_start = true;
    let template = templates.create(draft).unwrap();

    let workflow = engine
        .create_workflow(NewWorkflow::from_template(COMPANY, template.id, "Claim #1", INITIATOR))
        .await
        .unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Active);
    assert_eq!(workflow.template_version, Some(1));
    assert_eq!(workflow.workflow_type.as_deref(), Some("Finance"));

    let err = engine
        .create_workflow(NewWorkflow::from_template(COMPANY + 1, template.id, "Claim", INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    templates.deactivate(template.id).unwrap();
    let err = engine
        .create_workflow(NewWorkflow::from_template(COMPANY, template.id, "Claim #2", INITIATOR))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

/// An auto-start template that cannot start leaves nothing behind
#[tokio::test]
async fn test_failed_auto_start_persists_nothing() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let mut draft = template_draft("Expense claim", vec![expense_approval("approve", 1)]);
    draft.auto_start = true;
    let template = h.orchestrator.templates().create(draft).unwrap();

    let err = engine
        .create_workflow(
            NewWorkflow::from_template(COMPANY, template.id, "Claim #1", INITIATOR)
                .with_data(serde_json::json!({ "amount": 300 })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoApprovalRule);
    assert!(engine.list_workflows(COMPANY, None).is_empty());
    assert!(engine.list_my_tasks(COMPANY, INITIATOR, None).is_empty());
}

/// Comments are accepted in any task state but never empty
#[tokio::test]
async fn test_comments() {
    let h = harness(FakeDirectory::default());
    let engine = h.orchestrator.engine();
    let wf = ad_hoc_workflow(&engine, serde_json::json!({}), vec![review("a", 1)]).await;
    let a = task_by_key(&engine, wf, "a");

    let err = engine.comment(a.id, "  ", Actor::User(INITIATOR)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    engine.start(wf, Actor::User(INITIATOR)).await.unwrap();
    engine.complete(a.id, None, Performer::user(INITIATOR)).await.unwrap();
    engine
        .comment(a.id, "filed with receipts", Actor::User(INITIATOR))
        .await
        .unwrap();

    let actions = engine.task_actions(a.id).unwrap();
    let last = actions.last().unwrap();
    assert_eq!(last.action_type, ActionType::Comment);
    assert_eq!(last.comments.as_deref(), Some("filed with receipts"));
}
