//! Read models over workflows and tasks

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{
    CompanyId, TaskStatus, UserId, Workflow, WorkflowAction, WorkflowLog, WorkflowStatus,
    WorkflowTask,
};
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::persistence::DailyActivity;

/// Number of workflows the dashboard lists
const RECENT_WORKFLOWS: usize = 5;

/// A workflow with its tasks and history
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDetails {
    pub workflow: Workflow,
    /// Ordered by step
    pub tasks: Vec<WorkflowTask>,
    /// Newest first
    pub logs: Vec<WorkflowLog>,
}

/// Per-user overview of a company
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_workflows: usize,
    pub active_workflows: usize,
    /// Open tasks assigned to the user
    pub pending_tasks: Vec<WorkflowTask>,
    pub overdue_tasks: usize,
    pub recent_workflows: Vec<Workflow>,
    pub active_automations: usize,
}

impl WorkflowEngine {
    pub fn get_workflow(&self, workflow_id: Uuid) -> EngineResult<WorkflowDetails> {
        self.persistence
            .read(|store| {
                let workflow = store.workflow(workflow_id)?.clone();
                Some(WorkflowDetails {
                    workflow,
                    tasks: store.tasks_of(workflow_id).into_iter().cloned().collect(),
                    logs: store.logs_for_workflow(workflow_id),
                })
            })
            .ok_or_else(|| EngineError::not_found(EntityRef::Workflow(workflow_id)))
    }

    /// Company workflows, newest first
    pub fn list_workflows(&self, company_id: CompanyId, status: Option<WorkflowStatus>) -> Vec<Workflow> {
        self.persistence.read(|store| {
            let mut workflows: Vec<_> = store
                .workflows
                .iter()
                .filter(|w| w.company_id == company_id && status.is_none_or(|s| w.status == s))
                .cloned()
                .collect();
            workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            workflows
        })
    }

    /// Tasks assigned to a user, soonest due first; undated tasks last
    pub fn list_my_tasks(
        &self,
        company_id: CompanyId,
        user_id: UserId,
        status: Option<TaskStatus>,
    ) -> Vec<WorkflowTask> {
        self.persistence.read(|store| {
            let mut tasks: Vec<_> = store
                .tasks
                .iter()
                .filter(|t| t.assigned_to == Some(user_id))
                .filter(|t| status.is_none_or(|s| t.status == s))
                .filter(|t| {
                    store
                        .workflow(t.workflow_id)
                        .is_some_and(|w| w.company_id == company_id)
                })
                .cloned()
                .collect();
            tasks.sort_by_key(|t| (t.due_date.is_none(), t.due_date, t.created_at));
            tasks
        })
    }

    pub fn get_task(&self, task_id: Uuid) -> EngineResult<WorkflowTask> {
        self.persistence
            .read(|store| store.task(task_id).cloned())
            .ok_or_else(|| EngineError::not_found(EntityRef::Task(task_id)))
    }

    /// Actions recorded on a task, oldest first
    pub fn task_actions(&self, task_id: Uuid) -> EngineResult<Vec<WorkflowAction>> {
        self.persistence
            .read(|store| {
                store.task(task_id)?;
                Some(store.actions_for_task(task_id))
            })
            .ok_or_else(|| EngineError::not_found(EntityRef::Task(task_id)))
    }

    pub fn workflow_stats_by_status(&self, company_id: CompanyId) -> BTreeMap<WorkflowStatus, usize> {
        self.persistence
            .read(|store| store.workflow_stats_by_status(company_id))
    }

    pub fn task_stats_by_status(&self, company_id: CompanyId) -> BTreeMap<TaskStatus, usize> {
        self.persistence
            .read(|store| store.task_stats_by_status(company_id))
    }

    pub fn weekly_workflow_activity(&self, company_id: CompanyId, now: DateTime<Utc>) -> Vec<DailyActivity> {
        self.persistence
            .read(|store| store.weekly_workflow_activity(company_id, now))
    }

    pub fn dashboard(&self, company_id: CompanyId, user_id: UserId, now: DateTime<Utc>) -> Dashboard {
        let pending_tasks: Vec<_> = self
            .list_my_tasks(company_id, user_id, None)
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect();

        self.persistence.read(|store| {
            let company_workflows = || store.workflows.iter().filter(|w| w.company_id == company_id);

            let mut recent: Vec<_> = company_workflows().cloned().collect();
            recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            recent.truncate(RECENT_WORKFLOWS);

            let overdue_tasks = store
                .tasks
                .iter()
                .filter(|t| t.is_overdue(now) || t.status == TaskStatus::Overdue)
                .filter(|t| {
                    store
                        .workflow(t.workflow_id)
                        .is_some_and(|w| w.company_id == company_id)
                })
                .count();

            Dashboard {
                total_workflows: company_workflows().count(),
                active_workflows: company_workflows()
                    .filter(|w| w.status == WorkflowStatus::Active)
                    .count(),
                pending_tasks,
                overdue_tasks,
                recent_workflows: recent,
                active_automations: store
                    .automations
                    .iter()
                    .filter(|a| a.company_id == company_id && a.is_active)
                    .count(),
            }
        })
    }
}
