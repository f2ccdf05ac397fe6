//! State transitions applied to one workflow inside a store transaction
//!
//! A [`Session`] never performs I/O. Everything it changes lands in the working copy of
//! the store, so an error anywhere discards the whole operation.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{
    ActionType, Actor, CompanyId, TaskStatus, Workflow, WorkflowAction, WorkflowEvent,
    WorkflowLog, WorkflowStatus, WorkflowTask,
};
use crate::services::logging;
use crate::workflow::persistence::JsonStore;

/// Event committed by a session, reported once the transaction lands
#[derive(Debug, Clone, Copy)]
pub struct Emitted {
    pub event: WorkflowEvent,
    pub task_id: Option<Uuid>,
    pub actor: Actor,
}

/// Emit committed events to the tracing log
pub fn report(workflow_id: Uuid, emitted: &[Emitted]) {
    for e in emitted {
        logging::log_workflow_event(e.event, workflow_id, e.task_id, e.actor);
    }
}

/// Mutable view of one workflow and its tasks
pub struct Session<'a> {
    store: &'a mut JsonStore,
    workflow_id: Uuid,
    company_id: CompanyId,
    now: DateTime<Utc>,
    emitted: Vec<Emitted>,
}

impl<'a> Session<'a> {
    pub fn open(store: &'a mut JsonStore, workflow_id: Uuid, now: DateTime<Utc>) -> EngineResult<Self> {
        let company_id = store
            .workflow(workflow_id)
            .map(|w| w.company_id)
            .ok_or_else(|| EngineError::not_found(EntityRef::Workflow(workflow_id)))?;
        Ok(Self {
            store,
            workflow_id,
            company_id,
            now,
            emitted: Vec::new(),
        })
    }

    /// Events written during the session
    pub fn finish(self) -> Vec<Emitted> {
        self.emitted
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn store(&self) -> &JsonStore {
        self.store
    }

    pub fn workflow(&self) -> EngineResult<&Workflow> {
        self.store
            .workflow(self.workflow_id)
            .ok_or_else(|| EngineError::not_found(EntityRef::Workflow(self.workflow_id)))
    }

    fn workflow_mut(&mut self) -> EngineResult<&mut Workflow> {
        let id = self.workflow_id;
        self.store
            .workflow_mut(id)
            .ok_or_else(|| EngineError::not_found(EntityRef::Workflow(id)))
    }

    pub fn task(&self, task_id: Uuid) -> EngineResult<&WorkflowTask> {
        self.store
            .task(task_id)
            .filter(|t| t.workflow_id == self.workflow_id)
            .ok_or_else(|| EngineError::not_found(EntityRef::Task(task_id)))
    }

    pub fn task_mut(&mut self, task_id: Uuid) -> EngineResult<&mut WorkflowTask> {
        let workflow_id = self.workflow_id;
        let now = self.now;
        let task = self
            .store
            .task_mut(task_id)
            .filter(|t| t.workflow_id == workflow_id)
            .ok_or_else(|| EngineError::not_found(EntityRef::Task(task_id)))?;
        task.updated_at = now;
        Ok(task)
    }

    /// Task ids of the workflow, ordered by step
    pub fn task_ids(&self) -> Vec<Uuid> {
        self.store
            .tasks_of(self.workflow_id)
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    pub fn push_task(&mut self, task: WorkflowTask) {
        self.store.tasks.push(task);
    }

    pub fn log(
        &mut self,
        event: WorkflowEvent,
        task_id: Option<Uuid>,
        actor: Actor,
        description: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        self.store.append_log(WorkflowLog {
            id: Uuid::new_v4(),
            workflow_id: self.workflow_id,
            company_id: self.company_id,
            event_type: event,
            event_description: description.into(),
            event_data: data,
            actor,
            task_id,
            timestamp: self.now,
        });
        self.emitted.push(Emitted {
            event,
            task_id,
            actor,
        });
    }

    pub fn action(
        &mut self,
        task_id: Uuid,
        action_type: ActionType,
        actor: Actor,
        data: Option<serde_json::Value>,
        comments: Option<String>,
    ) {
        self.store.append_action(WorkflowAction {
            id: Uuid::new_v4(),
            task_id,
            workflow_id: self.workflow_id,
            action_type,
            action_data: data,
            comments,
            performed_by: actor,
            performed_at: self.now,
        });
    }

    pub fn require_status(&self, expected: WorkflowStatus, operation: &str) -> EngineResult<()> {
        let current = self.workflow()?.status;
        if current == expected {
            Ok(())
        } else {
            Err(EngineError::invalid_state(
                EntityRef::Workflow(self.workflow_id),
                current,
                operation,
            ))
        }
    }

    /// Move the workflow along one edge of its state machine
    pub fn set_status(
        &mut self,
        next: WorkflowStatus,
        actor: Actor,
        data: Option<serde_json::Value>,
    ) -> EngineResult<()> {
        let now = self.now;
        let workflow = self.workflow_mut()?;
        let previous = workflow.status;
        if !previous.can_transition_to(next) {
            return Err(EngineError::invalid_state(
                EntityRef::Workflow(workflow.id),
                previous,
                transition_verb(next),
            ));
        }

        workflow.status = next;
        workflow.updated_at = now;
        match next {
            WorkflowStatus::Active if previous == WorkflowStatus::Draft => {
                workflow.started_at = Some(now);
            }
            WorkflowStatus::Completed => {
                workflow.completed_at = Some(now);
                workflow.progress_percentage = 100.0;
            }
            WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
                workflow.completed_at = Some(now);
            }
            _ => {}
        }

        let event = match (previous, next) {
            (WorkflowStatus::Paused, WorkflowStatus::Active) => WorkflowEvent::WorkflowResumed,
            (_, WorkflowStatus::Active) => WorkflowEvent::WorkflowStarted,
            (_, WorkflowStatus::Paused) => WorkflowEvent::WorkflowPaused,
            (_, WorkflowStatus::Completed) => WorkflowEvent::WorkflowCompleted,
            (_, WorkflowStatus::Failed) => WorkflowEvent::WorkflowFailed,
            (_, WorkflowStatus::Cancelled) | (_, WorkflowStatus::Draft) => {
                WorkflowEvent::WorkflowCancelled
            }
        };
        self.log(
            event,
            None,
            actor,
            format!("Workflow {} -> {}", previous, next),
            data,
        );
        Ok(())
    }

    /// Pending -> in progress
    pub fn activate(&mut self, task_id: Uuid) -> EngineResult<()> {
        let now = self.now;
        let task = self.task_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            return Ok(());
        }
        task.status = TaskStatus::InProgress;
        task.started_at = Some(now);
        if task.due_date.is_none() {
            if let Some(progress) = &task.approval {
                task.due_date = Some(now + Duration::hours(progress.escalation_timeout as i64));
            }
        }
        let name = task.name.clone();
        self.log(
            WorkflowEvent::TaskStarted,
            Some(task_id),
            Actor::System,
            format!("Task '{}' started", name),
            None,
        );
        Ok(())
    }

    /// Activate every pending task whose dependencies have all completed
    pub fn activate_ready(&mut self) -> EngineResult<Vec<Uuid>> {
        let ready: Vec<Uuid> = self
            .store
            .tasks_of(self.workflow_id)
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.depends_on_tasks.iter().all(|dep| {
                    self.store
                        .task(*dep)
                        .is_some_and(|d| d.status == TaskStatus::Completed)
                })
            })
            .map(|t| t.id)
            .collect();

        for id in &ready {
            self.activate(*id)?;
        }
        Ok(ready)
    }

    /// Mark a task completed and record who did it
    pub fn complete_task(
        &mut self,
        task_id: Uuid,
        result: Option<serde_json::Value>,
        actor: Actor,
        comments: Option<String>,
    ) -> EngineResult<()> {
        let now = self.now;
        let task = self.task_mut(task_id)?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        if result.is_some() {
            task.result_data = result.clone();
        }
        let name = task.name.clone();

        self.action(task_id, ActionType::Complete, actor, result, comments);
        self.log(
            WorkflowEvent::TaskCompleted,
            Some(task_id),
            actor,
            format!("Task '{}' completed", name),
            None,
        );
        Ok(())
    }

    pub fn cancel_task(&mut self, task_id: Uuid, actor: Actor, reason: &str) -> EngineResult<()> {
        let task = self.task_mut(task_id)?;
        if task.status.is_terminal() {
            return Ok(());
        }
        task.status = TaskStatus::Cancelled;
        let name = task.name.clone();
        self.log(
            WorkflowEvent::TaskCancelled,
            Some(task_id),
            actor,
            format!("Task '{}' cancelled: {}", name, reason),
            None,
        );
        Ok(())
    }

    /// Cancel every task transitively waiting on `task_id`
    pub fn cancel_dependents(&mut self, task_id: Uuid, actor: Actor, reason: &str) -> EngineResult<usize> {
        let mut queue: VecDeque<Uuid> = self.task(task_id)?.blocks_tasks.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut cancelled = 0;

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let task = self.task(id)?;
            queue.extend(task.blocks_tasks.iter().copied());
            if !task.status.is_terminal() {
                self.cancel_task(id, actor, reason)?;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    pub fn cancel_open_tasks(&mut self, actor: Actor, reason: &str) -> EngineResult<()> {
        for id in self.task_ids() {
            self.cancel_task(id, actor, reason)?;
        }
        Ok(())
    }

    /// Activate newly unblocked tasks, then refresh progress and completion
    pub fn advance(&mut self) -> EngineResult<()> {
        self.activate_ready()?;
        self.recompute()
    }

    /// Recompute progress and current step; an active workflow with no open work completes
    pub fn recompute(&mut self) -> EngineResult<()> {
        let tasks = self.store.tasks_of(self.workflow_id);
        let progress = progress_of(&tasks);
        let open_step = tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.step_number)
            .min();
        let last_step = tasks.iter().map(|t| t.step_number).max().unwrap_or(0);
        let all_done = open_step.is_none();

        let now = self.now;
        let workflow = self.workflow_mut()?;
        workflow.progress_percentage = progress;
        workflow.current_step = open_step.unwrap_or(last_step);
        workflow.updated_at = now;

        if all_done && workflow.status == WorkflowStatus::Active {
            self.set_status(WorkflowStatus::Completed, Actor::System, None)?;
        }
        Ok(())
    }
}

/// completed / (total - cancelled - rejected) * 100, two decimals; 100 when nothing counts
pub fn progress_of(tasks: &[&WorkflowTask]) -> f64 {
    let countable = tasks
        .iter()
        .filter(|t| !matches!(t.status, TaskStatus::Cancelled | TaskStatus::Rejected))
        .count();
    if countable == 0 {
        return if tasks.iter().all(|t| t.status.is_terminal()) {
            100.0
        } else {
            0.0
        };
    }
    let completed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    (completed as f64 / countable as f64 * 10_000.0).round() / 100.0
}

fn transition_verb(next: WorkflowStatus) -> &'static str {
    match next {
        WorkflowStatus::Draft => "reset",
        WorkflowStatus::Active => "activate",
        WorkflowStatus::Paused => "pause",
        WorkflowStatus::Completed => "complete",
        WorkflowStatus::Failed => "fail",
        WorkflowStatus::Cancelled => "cancel",
    }
}
