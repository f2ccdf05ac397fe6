//! Workflow instance manager and task engine
//!
//! Every operation on a workflow runs under that workflow's lock. Collaborator calls
//! (directory, notifier, handlers) happen outside store transactions; each transaction
//! re-checks the state it depends on before mutating.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{
    ActionType, Actor, ApprovalProgress, Assignment, CompanyId, EngineConfiguration,
    NewWorkflow, Performer, TaskDefinition, TaskKind, TaskStatus, TaskType, UserId, Workflow,
    WorkflowEvent, WorkflowStatus, WorkflowTask, WorkflowTemplate,
};
use crate::services::collaborators::{
    with_timeout, ActionRequest, Directory, HandlerRegistry, Notification, Notifier,
};
use crate::services::logging;
use crate::workflow::conditions::{self, lookup};
use crate::workflow::locks::{EntityGuard, EntityLocks};
use crate::workflow::persistence::WorkflowPersistence;
use crate::workflow::router::ApprovalRouter;
use crate::workflow::templates::TemplateStore;
use crate::workflow::transitions::{self, Session};
use crate::workflow::validator::WorkflowValidator;

/// Timeouts the engine applies
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Wait bound for a workflow lock
    pub lock_timeout: std::time::Duration,
    /// Bound on every collaborator call
    pub collaborator_timeout: std::time::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfiguration::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfiguration) -> Self {
        Self {
            lock_timeout: std::time::Duration::from_millis(config.lock_timeout_ms),
            collaborator_timeout: std::time::Duration::from_secs(
                config.collaborator_timeout_seconds,
            ),
        }
    }
}

/// Outcome of an overdue sweep
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SweepReport {
    /// Tasks moved to overdue and escalated
    pub overdue: usize,
    /// Escalations that changed the assignee
    pub reassigned: usize,
    /// Workflows skipped because another operation held their lock
    pub skipped_workflows: usize,
}

/// What the engine decided for an automatic task
enum Automatic {
    Complete {
        result: serde_json::Value,
        auto_approved: bool,
    },
    /// Condition not met; cancel the branch
    Skip,
}

/// Workflow engine
pub struct WorkflowEngine {
    pub(crate) persistence: Arc<WorkflowPersistence>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    handlers: HandlerRegistry,
    locks: EntityLocks,
    settings: EngineSettings,
}

impl WorkflowEngine {
    pub fn new(
        persistence: Arc<WorkflowPersistence>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        handlers: HandlerRegistry,
        settings: EngineSettings,
    ) -> Self {
        Self {
            persistence,
            directory,
            notifier,
            handlers,
            locks: EntityLocks::new(),
            settings,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Whether an operation currently holds the workflow's lock
    pub fn is_busy(&self, workflow_id: Uuid) -> bool {
        self.locks.is_locked(workflow_id)
    }

    async fn lock(&self, workflow_id: Uuid) -> EngineResult<EntityGuard> {
        self.locks
            .acquire(
                EntityRef::Workflow(workflow_id),
                workflow_id,
                self.settings.lock_timeout,
            )
            .await
    }

    /// Run a session transaction and report its events once committed
    fn commit<T>(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
        work: impl FnOnce(&mut Session<'_>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let (value, emitted) = self.persistence.transaction(|store| {
            let mut session = Session::open(store, workflow_id, now)?;
            let value = work(&mut session)?;
            Ok((value, session.finish()))
        })?;
        transitions::report(workflow_id, &emitted);
        Ok(value)
    }

    fn snapshot(&self, workflow_id: Uuid) -> EngineResult<Workflow> {
        self.persistence
            .read(|store| store.workflow(workflow_id).cloned())
            .ok_or_else(|| EngineError::not_found(EntityRef::Workflow(workflow_id)))
    }

    fn task_snapshot(&self, task_id: Uuid) -> EngineResult<(WorkflowTask, Workflow)> {
        self.persistence
            .read(|store| {
                let task = store.task(task_id)?;
                let workflow = store.workflow(task.workflow_id)?;
                Some((task.clone(), workflow.clone()))
            })
            .ok_or_else(|| EngineError::not_found(EntityRef::Task(task_id)))
    }

    /// Lock the task's workflow and return fresh copies of both
    async fn lock_task(&self, task_id: Uuid) -> EngineResult<(EntityGuard, WorkflowTask, Workflow)> {
        let (task, _) = self.task_snapshot(task_id)?;
        let guard = self.lock(task.workflow_id).await?;
        let (task, workflow) = self.task_snapshot(task_id)?;
        Ok((guard, task, workflow))
    }

    // ---------------------------------------------------------------- lifecycle

    /// Create a workflow in draft, from a template or ad hoc; auto-start templates start it too
    pub async fn create_workflow(&self, new: NewWorkflow) -> EngineResult<Workflow> {
        let workflow_id = Uuid::new_v4();
        if new.name.trim().is_empty() {
            return Err(EngineError::validation(
                EntityRef::Workflow(workflow_id),
                "workflow name cannot be empty",
            ));
        }

        let template = match new.template_id {
            Some(template_id) => Some(self.instantiable_template(template_id, &new)?),
            None => None,
        };
        let definitions = template
            .as_ref()
            .map(|t| t.template_config.tasks.clone())
            .unwrap_or_default();
        let assignees = self.resolve_assignees(new.company_id, &definitions).await?;

        let now = Utc::now();
        let settings = new
            .settings
            .clone()
            .or_else(|| template.as_ref().map(|t| t.default_settings.clone()))
            .unwrap_or_default();
        let due_date = new
            .due_date
            .or_else(|| settings.due_in_days.map(|days| now + Duration::days(days as i64)));

        let tasks = instantiate(workflow_id, &definitions, &assignees, now);
        let workflow = Workflow {
            id: workflow_id,
            company_id: new.company_id,
            template_id: template.as_ref().map(|t| t.id),
            template_version: template.as_ref().map(|t| t.version),
            name: new.name,
            description: new.description,
            workflow_type: new
                .workflow_type
                .or_else(|| template.as_ref().and_then(|t| t.category.clone())),
            status: WorkflowStatus::Draft,
            current_step: tasks.iter().map(|t| t.step_number).min().unwrap_or(0),
            progress_percentage: 0.0,
            started_at: None,
            completed_at: None,
            due_date,
            estimated_duration: new.estimated_duration,
            workflow_data: new.workflow_data,
            settings,
            initiated_by: new.initiated_by,
            assigned_to: new.assigned_to,
            created_at: now,
            updated_at: now,
        };

        // Auto-started workflows are created and started in one commit
        let auto_start = template.as_ref().is_some_and(|t| t.auto_start);
        let _guard = self.lock(workflow_id).await?;
        let task_count = tasks.len();
        let initiator = Actor::User(workflow.initiated_by);
        let emitted = self.persistence.transaction(|store| {
            store.workflows.push(workflow.clone());
            store.tasks.extend(tasks);
            let mut session = Session::open(store, workflow_id, now)?;
            session.log(
                WorkflowEvent::WorkflowCreated,
                None,
                initiator,
                format!("Workflow '{}' created", workflow.name),
                Some(serde_json::json!({ "tasks": task_count })),
            );
            if auto_start {
                start_session(&mut session, initiator)?;
            }
            Ok(session.finish())
        })?;
        transitions::report(workflow_id, &emitted);

        if auto_start {
            self.drain_locked(workflow_id).await;
            return self.snapshot(workflow_id);
        }
        Ok(workflow)
    }

    fn instantiable_template(
        &self,
        template_id: Uuid,
        new: &NewWorkflow,
    ) -> EngineResult<WorkflowTemplate> {
        let entity = EntityRef::Template(template_id);
        let template = self
            .persistence
            .read(|store| store.template(template_id).cloned())
            .ok_or_else(|| EngineError::not_found(entity.clone()))?;

        if template.company_id != new.company_id {
            return Err(EngineError::not_found(entity));
        }
        if !template.is_active {
            return Err(EngineError::invalid_state(entity, "inactive", "instantiate"));
        }
        TemplateStore::validate_data(&template, &new.workflow_data)?;
        Ok(template)
    }

    /// Resolve one user per auto-assigned definition
    async fn resolve_assignees(
        &self,
        company_id: CompanyId,
        definitions: &[TaskDefinition],
    ) -> EngineResult<HashMap<String, UserId>> {
        let mut assignees = HashMap::new();
        for def in definitions.iter().filter(|d| d.auto_assign && d.assigned_to.is_none()) {
            let Some(role) = &def.assigned_role else {
                continue;
            };
            if let Some(user) = self.resolve_group(EntityRef::Company(company_id), company_id, role).await? {
                assignees.insert(def.key.clone(), user);
            }
        }
        Ok(assignees)
    }

    async fn resolve_group(
        &self,
        entity: EntityRef,
        company_id: CompanyId,
        group: &str,
    ) -> EngineResult<Option<UserId>> {
        with_timeout(
            entity,
            "directory",
            self.settings.collaborator_timeout,
            self.directory.resolve_assignee(company_id, group),
        )
        .await
    }

    /// Add a task to a draft workflow
    pub async fn add_task(&self, workflow_id: Uuid, definition: TaskDefinition) -> EngineResult<WorkflowTask> {
        let _guard = self.lock(workflow_id).await?;
        let workflow = self.snapshot(workflow_id)?;
        let assignees = self
            .resolve_assignees(workflow.company_id, std::slice::from_ref(&definition))
            .await?;

        let task = self.commit(workflow_id, Utc::now(), |s| {
            s.require_status(WorkflowStatus::Draft, "add a task to")?;

            let existing: Vec<WorkflowTask> = s
                .task_ids()
                .into_iter()
                .map(|id| s.task(id).cloned())
                .collect::<EngineResult<_>>()?;
            let keys: HashMap<Uuid, &str> = existing.iter().map(|t| (t.id, t.key.as_str())).collect();
            let mut definitions: Vec<TaskDefinition> =
                existing.iter().map(|t| definition_of(t, &keys)).collect();
            definitions.push(definition.clone());

            let result = WorkflowValidator::validate_task_graph(&definitions);
            if !result.is_valid() {
                return Err(EngineError::InvalidTemplate {
                    entity: EntityRef::Workflow(workflow_id),
                    reason: result.summary(),
                });
            }

            let by_key: HashMap<&str, Uuid> = existing.iter().map(|t| (t.key.as_str(), t.id)).collect();
            let depends_on: Vec<Uuid> = definition
                .depends_on
                .iter()
                .filter_map(|key| by_key.get(key.as_str()).copied())
                .collect();
            let task = build_task(
                workflow_id,
                Uuid::new_v4(),
                &definition,
                depends_on.clone(),
                assignees.get(&definition.key).copied(),
                s.now(),
            );
            for dep in depends_on {
                s.task_mut(dep)?.blocks_tasks.push(task.id);
            }
            s.push_task(task.clone());
            s.log(
                WorkflowEvent::TaskAdded,
                Some(task.id),
                Actor::User(workflow.initiated_by),
                format!("Task '{}' added", task.name),
                None,
            );
            s.recompute()?;
            Ok(task)
        })?;
        Ok(task)
    }

    /// Draft -> active; resolves approval chains and activates every root task
    pub async fn start(&self, workflow_id: Uuid, actor: Actor) -> EngineResult<Workflow> {
        let _guard = self.lock(workflow_id).await?;

        self.commit(workflow_id, Utc::now(), |s| start_session(s, actor))?;

        self.drain_locked(workflow_id).await;
        self.snapshot(workflow_id)
    }

    /// Active -> paused
    pub async fn pause(&self, workflow_id: Uuid, actor: Actor) -> EngineResult<Workflow> {
        let _guard = self.lock(workflow_id).await?;
        self.commit(workflow_id, Utc::now(), |s| {
            s.set_status(WorkflowStatus::Paused, actor, None)
        })?;
        self.snapshot(workflow_id)
    }

    /// Paused -> active
    pub async fn resume(&self, workflow_id: Uuid, actor: Actor) -> EngineResult<Workflow> {
        let _guard = self.lock(workflow_id).await?;
        self.commit(workflow_id, Utc::now(), |s| {
            s.require_status(WorkflowStatus::Paused, "resume")?;
            s.set_status(WorkflowStatus::Active, actor, None)?;
            s.advance()
        })?;
        self.drain_locked(workflow_id).await;
        self.snapshot(workflow_id)
    }

    /// Cancel a workflow and all its open tasks; cancelling twice is a no-op
    pub async fn cancel(&self, workflow_id: Uuid, actor: Actor, reason: &str) -> EngineResult<Workflow> {
        let _guard = self.lock(workflow_id).await?;
        self.commit(workflow_id, Utc::now(), |s| {
            if s.workflow()?.status == WorkflowStatus::Cancelled {
                return Ok(());
            }
            s.set_status(
                WorkflowStatus::Cancelled,
                actor,
                Some(serde_json::json!({ "reason": reason })),
            )?;
            s.cancel_open_tasks(actor, reason)
        })?;
        self.snapshot(workflow_id)
    }

    // ---------------------------------------------------------------- tasks

    /// Assign a task to a user or a group
    pub async fn assign(&self, task_id: Uuid, target: Assignment, actor: Actor) -> EngineResult<WorkflowTask> {
        let (_guard, task, workflow) = self.lock_task(task_id).await?;

        let resolved = match &target {
            Assignment::Group(group) if task.auto_assign => {
                self.resolve_group(EntityRef::Task(task_id), workflow.company_id, group)
                    .await?
            }
            _ => None,
        };

        let updated = self.commit(workflow.id, Utc::now(), |s| {
            let status = s.workflow()?.status;
            if !matches!(status, WorkflowStatus::Draft | WorkflowStatus::Active) {
                return Err(EngineError::invalid_state(
                    EntityRef::Workflow(workflow.id),
                    status,
                    "assign tasks of",
                ));
            }
            let task = s.task_mut(task_id)?;
            if task.status.is_terminal() {
                return Err(EngineError::invalid_state(
                    EntityRef::Task(task_id),
                    task.status,
                    "assign",
                ));
            }
            match &target {
                Assignment::User(user) => task.assigned_to = Some(*user),
                Assignment::Group(group) => {
                    task.assigned_group = Some(group.clone());
                    task.assigned_to = resolved;
                }
            }
            let updated = task.clone();

            let data = serde_json::json!({
                "assigned_to": updated.assigned_to,
                "assigned_group": updated.assigned_group,
            });
            s.action(task_id, ActionType::Assign, actor, Some(data.clone()), None);
            s.log(
                WorkflowEvent::TaskAssigned,
                Some(task_id),
                actor,
                format!("Task '{}' assigned", updated.name),
                Some(data),
            );
            Ok(updated)
        })?;

        if updated.notification_enabled {
            if let Some(user) = updated.assigned_to {
                self.notify_quietly(Notification {
                    company_id: workflow.company_id,
                    recipients: vec![user],
                    subject: format!("Task assigned: {}", updated.name),
                    body: format!("You have been assigned '{}' in '{}'", updated.name, workflow.name),
                    workflow_id: Some(workflow.id),
                    task_id: Some(task_id),
                })
                .await;
            }
        }
        Ok(updated)
    }

    /// Complete an in-progress task
    pub async fn complete(
        &self,
        task_id: Uuid,
        result_data: Option<serde_json::Value>,
        performer: Performer,
    ) -> EngineResult<WorkflowTask> {
        let (_guard, task, workflow) = self.lock_task(task_id).await?;
        self.persistence
            .read(|store| check_completable(store, &task, &workflow, result_data.as_ref()))?;
        self.authorize(&task, &workflow, performer).await?;

        self.commit(workflow.id, Utc::now(), |s| {
            let current = s.task(task_id)?.clone();
            let workflow = s.workflow()?.clone();
            check_completable(s.store(), &current, &workflow, result_data.as_ref())?;
            s.complete_task(task_id, result_data, performer.actor(), None)?;
            s.advance()
        })?;

        self.drain_locked(workflow.id).await;
        self.task_snapshot(task_id).map(|(task, _)| task)
    }

    /// Approve the current level of an approval task
    pub async fn approve(
        &self,
        task_id: Uuid,
        comments: Option<String>,
        performer: Performer,
    ) -> EngineResult<WorkflowTask> {
        let (_guard, task, workflow) = self.lock_task(task_id).await?;
        check_open(&task, &workflow, "approve")?;
        if task.task_type != TaskType::Approval {
            return Err(EngineError::invalid_state(
                EntityRef::Task(task_id),
                format!("a {} task", task.task_type.as_str()),
                "approve",
            ));
        }
        self.authorize_decision(&task, &workflow, performer).await?;

        self.commit(workflow.id, Utc::now(), |s| {
            let workflow = s.workflow()?.clone();
            let current = s.task_mut(task_id)?;
            check_open(current, &workflow, "approve")?;

            let level = match current.approval.as_mut() {
                Some(progress) => {
                    let Some(level) = progress.current_level().cloned() else {
                        return Err(EngineError::invalid_state(
                            EntityRef::Task(task_id),
                            "fully approved",
                            "approve",
                        ));
                    };
                    progress.approved_levels += 1;
                    Some(level)
                }
                None => None,
            };
            let satisfied = current.approval.as_ref().is_none_or(|p| p.is_satisfied());
            let name = current.name.clone();

            let data = level
                .as_ref()
                .map(|l| serde_json::json!({ "level": l.level, "role": l.role }));
            s.action(task_id, ActionType::Approve, performer.actor(), data.clone(), comments.clone());
            s.log(
                WorkflowEvent::TaskApproved,
                Some(task_id),
                performer.actor(),
                format!("Task '{}' approved", name),
                data,
            );

            if satisfied {
                s.complete_task(
                    task_id,
                    Some(serde_json::json!({ "approved": true })),
                    performer.actor(),
                    comments,
                )?;
                s.advance()?;
            }
            Ok(())
        })?;

        self.drain_locked(workflow.id).await;
        self.task_snapshot(task_id).map(|(task, _)| task)
    }

    /// Reject an approval or review task
    ///
    /// Fails the workflow unless the task is optional or the workflow continues on
    /// rejection, in which case only the rejected branch is skipped.
    pub async fn reject(&self, task_id: Uuid, reason: &str, performer: Performer) -> EngineResult<WorkflowTask> {
        let (_guard, task, workflow) = self.lock_task(task_id).await?;
        if !task.task_type.is_rejectable() {
            return Err(EngineError::invalid_state(
                EntityRef::Task(task_id),
                format!("a {} task", task.task_type.as_str()),
                "reject",
            ));
        }
        check_open(&task, &workflow, "reject")?;
        self.authorize_decision(&task, &workflow, performer).await?;

        let actor = performer.actor();
        self.commit(workflow.id, Utc::now(), |s| {
            let workflow = s.workflow()?.clone();
            let now = s.now();
            let current = s.task_mut(task_id)?;
            check_open(current, &workflow, "reject")?;
            current.status = TaskStatus::Rejected;
            current.completed_at = Some(now);
            let (name, optional) = (current.name.clone(), current.optional);

            s.action(task_id, ActionType::Reject, actor, None, Some(reason.to_string()));
            s.log(
                WorkflowEvent::TaskRejected,
                Some(task_id),
                actor,
                format!("Task '{}' rejected", name),
                Some(serde_json::json!({ "reason": reason })),
            );

            if optional || workflow.settings.continue_on_rejection {
                s.cancel_dependents(task_id, Actor::System, "upstream task rejected")?;
                s.advance()
            } else {
                // Fail before cancelling, or recompute would see no open work and complete it
                s.set_status(
                    WorkflowStatus::Failed,
                    actor,
                    Some(serde_json::json!({ "rejected_task": task_id, "reason": reason })),
                )?;
                s.cancel_open_tasks(Actor::System, "workflow failed")?;
                s.recompute()
            }
        })?;

        self.drain_locked(workflow.id).await;
        self.task_snapshot(task_id).map(|(task, _)| task)
    }

    /// Record a comment; allowed in any task state
    pub async fn comment(&self, task_id: Uuid, text: &str, actor: Actor) -> EngineResult<()> {
        if text.trim().is_empty() {
            return Err(EngineError::validation(
                EntityRef::Task(task_id),
                "comment cannot be empty",
            ));
        }
        let (_guard, task, _) = self.lock_task(task_id).await?;
        self.commit(task.workflow_id, Utc::now(), |s| {
            s.task(task_id)?;
            s.action(task_id, ActionType::Comment, actor, None, Some(text.to_string()));
            Ok(())
        })
    }

    async fn authorize(&self, task: &WorkflowTask, workflow: &Workflow, performer: Performer) -> EngineResult<()> {
        let assignee = match (task.assigned_to, &task.assigned_group) {
            (Some(user), _) => user == performer.user_id,
            (None, Some(group)) => self.is_member(task, workflow, performer.user_id, group).await?,
            (None, None) => {
                workflow.initiated_by == performer.user_id
                    || workflow.assigned_to == Some(performer.user_id)
            }
        };
        if assignee || self.has_override(task, workflow, performer).await? {
            Ok(())
        } else {
            Err(not_assigned(task, performer))
        }
    }

    /// Approvers must hold the current level's role; plain tasks fall back to assignment
    async fn authorize_decision(
        &self,
        task: &WorkflowTask,
        workflow: &Workflow,
        performer: Performer,
    ) -> EngineResult<()> {
        let Some(level) = task.approval.as_ref().and_then(|p| p.current_level()) else {
            return self.authorize(task, workflow, performer).await;
        };
        if self.is_member(task, workflow, performer.user_id, &level.role).await?
            || self.has_override(task, workflow, performer).await?
        {
            Ok(())
        } else {
            Err(not_assigned(task, performer))
        }
    }

    async fn is_member(
        &self,
        task: &WorkflowTask,
        workflow: &Workflow,
        user_id: UserId,
        group: &str,
    ) -> EngineResult<bool> {
        with_timeout(
            EntityRef::Task(task.id),
            "directory",
            self.settings.collaborator_timeout,
            self.directory.is_member(workflow.company_id, user_id, group),
        )
        .await
    }

    async fn has_override(&self, task: &WorkflowTask, workflow: &Workflow, performer: Performer) -> EngineResult<bool> {
        if !performer.admin_override {
            return Ok(false);
        }
        with_timeout(
            EntityRef::Task(task.id),
            "directory",
            self.settings.collaborator_timeout,
            self.directory.is_admin(workflow.company_id, performer.user_id),
        )
        .await
    }

    // ---------------------------------------------------------------- automatic work

    /// Run automatic tasks of every active workflow that has some
    ///
    /// Workflows locked by another operation are left for the next pass.
    pub async fn drain_active(&self) -> usize {
        let candidates: Vec<Uuid> = self.persistence.read(|store| {
            store
                .workflows
                .iter()
                .filter(|w| w.status == WorkflowStatus::Active)
                .filter(|w| {
                    store
                        .tasks_of(w.id)
                        .iter()
                        .any(|t| t.status.is_actionable() && t.runs_automatically())
                })
                .map(|w| w.id)
                .collect()
        });

        let mut processed = 0;
        for workflow_id in candidates {
            let Some(_guard) = self.locks.try_acquire(workflow_id) else {
                tracing::debug!(workflow_id = %workflow_id, "Workflow busy, drain skipped");
                continue;
            };
            processed += self.drain_locked(workflow_id).await;
        }
        processed
    }

    /// Execute automatic tasks until none is runnable; caller holds the workflow lock
    async fn drain_locked(&self, workflow_id: Uuid) -> usize {
        let mut attempted = HashSet::new();
        let mut processed = 0;

        loop {
            let next = self.persistence.read(|store| {
                let workflow = store.workflow(workflow_id)?;
                if workflow.status != WorkflowStatus::Active {
                    return None;
                }
                store
                    .tasks_of(workflow_id)
                    .into_iter()
                    .find(|t| {
                        t.status.is_actionable()
                            && t.runs_automatically()
                            && !attempted.contains(&t.id)
                    })
                    .map(|t| (t.clone(), workflow.clone()))
            });
            let Some((task, workflow)) = next else {
                break;
            };
            attempted.insert(task.id);

            match self.run_automatic(&task, &workflow).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    workflow_id = %workflow_id,
                    task_id = %task.id,
                    error = %e,
                    "Automatic task failed; will retry on the next pass"
                ),
            }
        }
        processed
    }

    async fn run_automatic(&self, task: &WorkflowTask, workflow: &Workflow) -> EngineResult<bool> {
        let outcome = self.decide(task, workflow).await?;
        let task_id = task.id;

        self.commit(workflow.id, Utc::now(), |s| {
            if s.workflow()?.status != WorkflowStatus::Active || !s.task(task_id)?.status.is_actionable() {
                return Ok(false);
            }
            match outcome {
                Automatic::Complete {
                    result,
                    auto_approved,
                } => {
                    if auto_approved {
                        let data = serde_json::json!({ "auto_approved": true });
                        s.action(task_id, ActionType::Approve, Actor::System, Some(data.clone()), None);
                        s.log(
                            WorkflowEvent::TaskApproved,
                            Some(task_id),
                            Actor::System,
                            "Auto-approved below threshold",
                            Some(data),
                        );
                    }
                    s.complete_task(task_id, Some(result), Actor::System, None)?;
                }
                Automatic::Skip => {
                    s.cancel_task(task_id, Actor::System, "condition not met")?;
                    s.cancel_dependents(task_id, Actor::System, "branch skipped")?;
                }
            }
            s.advance()?;
            Ok(true)
        })
    }

    async fn decide(&self, task: &WorkflowTask, workflow: &Workflow) -> EngineResult<Automatic> {
        let entity = EntityRef::Task(task.id);
        let timeout = self.settings.collaborator_timeout;

        let result = match &task.task_config {
            TaskKind::Approval { .. } => {
                let auto_approved = task.approval.as_ref().is_some_and(|p| p.chain.is_empty());
                return Ok(Automatic::Complete {
                    result: serde_json::json!({ "auto_approved": auto_approved }),
                    auto_approved,
                });
            }
            TaskKind::Notification {
                recipients,
                subject,
                body,
            } => {
                let recipients = if recipients.is_empty() {
                    vec![workflow.assigned_to.unwrap_or(workflow.initiated_by)]
                } else {
                    recipients.clone()
                };
                let notification = Notification {
                    company_id: workflow.company_id,
                    recipients,
                    subject: subject.clone(),
                    body: body.clone(),
                    workflow_id: Some(workflow.id),
                    task_id: Some(task.id),
                };
                let report = with_timeout(
                    entity.clone(),
                    "notifier",
                    timeout,
                    self.notifier.notify(&notification),
                )
                .await?;
                if report.is_total_failure() {
                    return Err(EngineError::AutomationExecution {
                        entity,
                        message: "no recipient could be notified".to_string(),
                    });
                }
                serde_json::to_value(&report).map_err(|e| EngineError::Storage(e.into()))?
            }
            TaskKind::Automated { handler, parameters } => {
                let runner = self.handlers.get(handler).ok_or_else(|| {
                    EngineError::AutomationExecution {
                        entity: entity.clone(),
                        message: format!("no action handler registered as '{}'", handler),
                    }
                })?;
                let request = ActionRequest {
                    company_id: workflow.company_id,
                    handler: handler.clone(),
                    parameters: parameters.clone(),
                    payload: workflow.workflow_data.clone(),
                    workflow_id: Some(workflow.id),
                };
                with_timeout(entity, handler, timeout, runner.run(&request))
                    .await?
                    .output
            }
            TaskKind::Conditional { conditions } => {
                if !conditions::evaluate_all(conditions, &workflow.workflow_data) {
                    return Ok(Automatic::Skip);
                }
                serde_json::json!({ "conditions_met": true })
            }
            TaskKind::Review { .. } | TaskKind::DataEntry { .. } => {
                serde_json::json!({ "auto_completed": true })
            }
        };

        Ok(Automatic::Complete {
            result,
            auto_approved: false,
        })
    }

    // ---------------------------------------------------------------- overdue sweep

    /// Escalate every open task of an active workflow that is past due
    pub async fn sweep_overdue(&self, now: DateTime<Utc>) -> SweepReport {
        let mut due: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        self.persistence.read(|store| {
            for workflow in store
                .workflows
                .iter()
                .filter(|w| w.status == WorkflowStatus::Active)
            {
                for task in store.tasks_of(workflow.id) {
                    if task.status == TaskStatus::InProgress && task.is_overdue(now) {
                        due.entry(workflow.id).or_default().push(task.id);
                    }
                }
            }
        });

        let mut report = SweepReport::default();
        for (workflow_id, task_ids) in due {
            let Some(_guard) = self.locks.try_acquire(workflow_id) else {
                report.skipped_workflows += 1;
                continue;
            };
            for task_id in task_ids {
                match self.escalate(task_id, now).await {
                    Ok(Some(reassigned)) => {
                        report.overdue += 1;
                        if reassigned {
                            report.reassigned += 1;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(task_id = %task_id, error = %e, "Escalation failed")
                    }
                }
            }
        }

        if report.overdue > 0 {
            tracing::info!(
                overdue = report.overdue,
                reassigned = report.reassigned,
                "Overdue sweep finished"
            );
        }
        report
    }

    /// Some(reassigned) when the task was escalated; caller holds the workflow lock
    async fn escalate(&self, task_id: Uuid, now: DateTime<Utc>) -> EngineResult<Option<bool>> {
        let (task, workflow) = self.task_snapshot(task_id)?;
        let replacement = match &task.assigned_group {
            Some(group) => match self.resolve_group(EntityRef::Task(task_id), workflow.company_id, group).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Escalation reassignment failed");
                    None
                }
            },
            None => None,
        };

        let escalated = self.commit(workflow.id, now, |s| {
            if s.workflow()?.status != WorkflowStatus::Active {
                return Ok(None);
            }
            let current = s.task_mut(task_id)?;
            if current.status != TaskStatus::InProgress || !current.is_overdue(now) {
                return Ok(None);
            }
            current.status = TaskStatus::Overdue;
            let previous = current.assigned_to;
            let reassigned = replacement.is_some_and(|user| Some(user) != previous);
            if reassigned {
                current.assigned_to = replacement;
            }
            let escalated = current.clone();

            s.log(
                WorkflowEvent::TaskOverdue,
                Some(task_id),
                Actor::System,
                format!("Task '{}' is overdue", escalated.name),
                Some(serde_json::json!({ "due_date": escalated.due_date })),
            );
            let data = serde_json::json!({
                "previous_assignee": previous,
                "assigned_to": escalated.assigned_to,
            });
            s.action(task_id, ActionType::Escalate, Actor::System, Some(data.clone()), None);
            s.log(
                WorkflowEvent::TaskEscalated,
                Some(task_id),
                Actor::System,
                format!("Task '{}' escalated", escalated.name),
                Some(data),
            );
            Ok(Some((escalated, reassigned)))
        })?;

        let Some((escalated, reassigned)) = escalated else {
            return Ok(None);
        };
        logging::log_escalation(
            workflow.id,
            task_id,
            escalated.assigned_to.filter(|_| reassigned),
        );

        let mut recipients: Vec<UserId> = escalated
            .assigned_to
            .into_iter()
            .chain(workflow.assigned_to)
            .chain(std::iter::once(workflow.initiated_by))
            .collect();
        recipients.sort_unstable();
        recipients.dedup();
        self.notify_quietly(Notification {
            company_id: workflow.company_id,
            recipients,
            subject: format!("Overdue: {}", escalated.name),
            body: format!(
                "Task '{}' in '{}' is past its due date",
                escalated.name, workflow.name
            ),
            workflow_id: Some(workflow.id),
            task_id: Some(task_id),
        })
        .await;

        Ok(Some(reassigned))
    }

    /// Deliver a notification; failures are logged, never propagated
    async fn notify_quietly(&self, notification: Notification) {
        if notification.recipients.is_empty() {
            return;
        }
        let entity = notification
            .task_id
            .map(EntityRef::Task)
            .unwrap_or(EntityRef::Company(notification.company_id));
        match with_timeout(
            entity,
            "notifier",
            self.settings.collaborator_timeout,
            self.notifier.notify(&notification),
        )
        .await
        {
            Ok(report) if !report.failed.is_empty() => {
                tracing::warn!(failed = ?report.failed, subject = %notification.subject, "Notification partially delivered");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, subject = %notification.subject, "Notification failed"),
        }
    }
}

/// Resolve approval chains, then move a draft to active and activate its root tasks
fn start_session(s: &mut Session<'_>, actor: Actor) -> EngineResult<()> {
    s.require_status(WorkflowStatus::Draft, "start")?;
    let workflow = s.workflow()?.clone();

    let mut chains = Vec::new();
    for id in s.task_ids() {
        let task = s.task(id)?;
        if let Some((approval_type, amount, category)) = approval_request(task, &workflow.workflow_data)? {
            let chain = ApprovalRouter::resolve_in(
                s.store(),
                workflow.company_id,
                &approval_type,
                amount,
                category.as_deref(),
            )?;
            chains.push((id, chain));
        }
    }
    for (id, chain) in chains {
        s.task_mut(id)?.approval = Some(ApprovalProgress {
            approval_workflow_id: chain.approval_workflow_id,
            chain: chain.levels,
            approved_levels: 0,
            escalation_timeout: chain.escalation_timeout,
        });
    }

    s.set_status(WorkflowStatus::Active, actor, None)?;
    s.advance()
}

fn not_assigned(task: &WorkflowTask, performer: Performer) -> EngineError {
    EngineError::NotAssigned {
        entity: EntityRef::Task(task.id),
        performer: performer.actor().to_string(),
    }
}

/// Workflow active and task open to a decision
fn check_open(task: &WorkflowTask, workflow: &Workflow, operation: &str) -> EngineResult<()> {
    if workflow.status != WorkflowStatus::Active {
        return Err(EngineError::invalid_state(
            EntityRef::Workflow(workflow.id),
            workflow.status,
            &format!("{} tasks of", operation),
        ));
    }
    if !task.status.is_actionable() {
        return Err(EngineError::invalid_state(
            EntityRef::Task(task.id),
            task.status,
            operation,
        ));
    }
    Ok(())
}

fn check_completable(
    store: &crate::workflow::persistence::JsonStore,
    task: &WorkflowTask,
    workflow: &Workflow,
    result_data: Option<&serde_json::Value>,
) -> EngineResult<()> {
    let entity = EntityRef::Task(task.id);
    if task.status.is_terminal() {
        return Err(EngineError::invalid_state(entity, task.status, "complete"));
    }

    let pending: Vec<Uuid> = task
        .depends_on_tasks
        .iter()
        .copied()
        .filter(|dep| store.task(*dep).is_none_or(|d| d.status != TaskStatus::Completed))
        .collect();
    if !pending.is_empty() {
        return Err(EngineError::DependencyNotSatisfied { entity, pending });
    }

    check_open(task, workflow, "complete")?;

    if let Some(progress) = &task.approval {
        if let Some(level) = progress.current_level() {
            return Err(EngineError::invalid_state(
                entity,
                format!("awaiting approval level {} ({})", level.level, level.role),
                "complete",
            ));
        }
    }

    if let TaskKind::DataEntry { required_fields } = &task.task_config {
        let missing: Vec<&str> = required_fields
            .iter()
            .filter(|field| result_data.and_then(|data| lookup(data, field)).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::validation(
                entity,
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }
    }
    Ok(())
}

/// Routing request of an approval task: type, amount and category
fn approval_request(
    task: &WorkflowTask,
    data: &serde_json::Value,
) -> EngineResult<Option<(String, Decimal, Option<String>)>> {
    let TaskKind::Approval {
        approval_type: Some(approval_type),
        amount,
        amount_field,
        category,
    } = &task.task_config
    else {
        return Ok(None);
    };

    let amount = match (amount, amount_field) {
        (Some(amount), _) => *amount,
        (None, Some(field)) => lookup(data, field).and_then(decimal_of).ok_or_else(|| {
            EngineError::validation(
                EntityRef::Task(task.id),
                format!("workflow data field '{}' is not an amount", field),
            )
        })?,
        (None, None) => Decimal::ZERO,
    };
    let category = category.clone().or_else(|| {
        lookup(data, "category")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    });
    Ok(Some((approval_type.clone(), amount, category)))
}

fn decimal_of(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Copy template definitions into fresh tasks, wiring both dependency directions
fn instantiate(
    workflow_id: Uuid,
    definitions: &[TaskDefinition],
    assignees: &HashMap<String, UserId>,
    now: DateTime<Utc>,
) -> Vec<WorkflowTask> {
    let ids: Vec<Uuid> = definitions.iter().map(|_| Uuid::new_v4()).collect();
    let by_key: HashMap<&str, Uuid> = definitions
        .iter()
        .zip(&ids)
        .map(|(def, id)| (def.key.as_str(), *id))
        .collect();

    let mut tasks: Vec<WorkflowTask> = definitions
        .iter()
        .zip(&ids)
        .map(|(def, id)| {
            let depends_on = def
                .depends_on
                .iter()
                .filter_map(|key| by_key.get(key.as_str()).copied())
                .collect();
            build_task(workflow_id, *id, def, depends_on, assignees.get(&def.key).copied(), now)
        })
        .collect();

    let mut blocks: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for task in &tasks {
        for dep in &task.depends_on_tasks {
            blocks.entry(*dep).or_default().push(task.id);
        }
    }
    for task in &mut tasks {
        task.blocks_tasks = blocks.remove(&task.id).unwrap_or_default();
    }
    tasks
}

fn build_task(
    workflow_id: Uuid,
    id: Uuid,
    def: &TaskDefinition,
    depends_on: Vec<Uuid>,
    resolved: Option<UserId>,
    now: DateTime<Utc>,
) -> WorkflowTask {
    WorkflowTask {
        id,
        workflow_id,
        key: def.key.clone(),
        name: def.name.clone(),
        description: def.description.clone(),
        task_type: def.kind.task_type(),
        step_number: def.step,
        status: TaskStatus::Pending,
        priority: def.priority,
        assigned_to: def.assigned_to.or(resolved),
        assigned_group: def.assigned_role.clone(),
        due_date: def.due_in_days.map(|days| now + Duration::days(days as i64)),
        estimated_duration: def.estimated_duration_minutes,
        started_at: None,
        completed_at: None,
        task_config: def.kind.clone(),
        result_data: None,
        depends_on_tasks: depends_on,
        blocks_tasks: Vec::new(),
        auto_assign: def.auto_assign,
        auto_complete: def.auto_complete,
        notification_enabled: def.notification_enabled,
        optional: def.optional,
        approval: None,
        created_at: now,
        updated_at: now,
    }
}

/// Rebuild the definition of an instantiated task for graph validation
fn definition_of(task: &WorkflowTask, keys: &HashMap<Uuid, &str>) -> TaskDefinition {
    let depends_on: Vec<&str> = task
        .depends_on_tasks
        .iter()
        .filter_map(|id| keys.get(id).copied())
        .collect();
    let mut def = TaskDefinition::new(&task.key, task.step_number, task.task_config.clone())
        .depends_on(&depends_on);
    def.name = task.name.clone();
    def.auto_assign = task.auto_assign;
    def.assigned_role = task.assigned_group.clone();
    def
}
