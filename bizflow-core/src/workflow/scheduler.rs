//! Automation scheduler
//!
//! A tick sweeps overdue tasks, drains automatic tasks, then dispatches every due
//! automation onto a bounded worker pool. Two executions of the same automation never
//! overlap: each one must win the automation's in-process lock with `try_acquire`, then
//! claim it in a store transaction that re-checks it is still due. The claim is what
//! keeps separate handles on one store file apart.

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, EntityRef};
use crate::models::{
    AutomationDraft, AutomationExecution, CompanyId, EngineConfiguration, ExecutionStatus,
    ProcessAutomation, RetryPolicy, TriggerConfig, TriggerSource, UserId,
};
use crate::services::logging;
use crate::workflow::actions::{merge_object, ActionExecutor};
use crate::workflow::conditions;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::locks::EntityLocks;
use crate::workflow::persistence::{JsonStore, WorkflowPersistence};
use crate::workflow::schedule;
use crate::workflow::validator::WorkflowValidator;

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: std::time::Duration,
    pub worker_pool_size: usize,
    pub default_retry_policy: RetryPolicy,
    pub conditional_cooldown_minutes: u32,
    /// How long a claim keeps other handles off a running automation
    pub claim_lease: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfiguration::default())
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &EngineConfiguration) -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(config.poll_interval_seconds),
            worker_pool_size: config.worker_pool_size.max(1),
            default_retry_policy: config.default_retry_policy.clone(),
            conditional_cooldown_minutes: config.conditional_cooldown_minutes,
            claim_lease: Duration::seconds((config.collaborator_timeout_seconds * 4).max(300) as i64),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TickReport {
    /// Automation executions recorded
    pub executed: usize,
    /// Due automations skipped (already running, no longer due, conditions unmet)
    pub skipped: usize,
    /// Automations disabled after exhausting their retries
    pub disabled: usize,
    /// Tasks escalated by the overdue sweep
    pub overdue: usize,
    /// Automatic tasks processed
    pub drained: usize,
}

/// Why an automation is due
#[derive(Debug, Clone)]
enum Due {
    Run {
        source: TriggerSource,
        input: serde_json::Value,
        attempt: u32,
    },
    /// Scheduled time reached but conditions unmet; only the schedule moves
    Advance,
}

enum Dispatch {
    Executed { disabled: bool },
    Skipped,
}

/// Automation scheduler
pub struct AutomationScheduler {
    persistence: Arc<WorkflowPersistence>,
    executor: ActionExecutor,
    engine: Arc<WorkflowEngine>,
    locks: EntityLocks,
    workers: Semaphore,
    settings: SchedulerSettings,
}

impl AutomationScheduler {
    pub fn new(engine: Arc<WorkflowEngine>, settings: SchedulerSettings) -> Self {
        Self {
            persistence: engine.persistence.clone(),
            executor: ActionExecutor::new(engine.clone()),
            engine,
            locks: EntityLocks::new(),
            workers: Semaphore::new(settings.worker_pool_size),
            settings,
        }
    }

    // ---------------------------------------------------------------- configuration

    /// Validate and store an automation; scheduled ones get their first `next_run`
    pub fn configure(&self, draft: AutomationDraft) -> EngineResult<ProcessAutomation> {
        let id = Uuid::new_v4();
        let entity = EntityRef::Automation(id);
        let result = WorkflowValidator::validate_automation(&draft);
        if !result.is_valid() {
            return Err(EngineError::validation(entity, result.summary()));
        }

        let now = Utc::now();
        let automation = ProcessAutomation {
            id,
            company_id: draft.company_id,
            name: draft.name,
            description: draft.description,
            next_run: next_scheduled(&draft.trigger, now),
            trigger: draft.trigger,
            trigger_conditions: draft.trigger_conditions,
            action: draft.action,
            action_parameters: draft.action_parameters,
            workflow_id: draft.workflow_id,
            last_run: None,
            is_active: true,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            claimed_until: None,
            retry_config: draft
                .retry_config
                .unwrap_or_else(|| self.settings.default_retry_policy.clone()),
            created_by: draft.created_by,
            created_at: now,
            updated_at: now,
        };

        self.persistence.transaction(|store| {
            if let Some(workflow_id) = automation.workflow_id {
                if store.workflow(workflow_id).is_none() {
                    return Err(EngineError::not_found(EntityRef::Workflow(workflow_id)));
                }
            }
            store.automations.push(automation.clone());
            Ok(())
        })?;

        tracing::info!(
            automation_id = %automation.id,
            name = %automation.name,
            automation_type = ?automation.automation_type(),
            next_run = automation.next_run.map(|t| t.to_rfc3339()).unwrap_or_default(),
            "Automation configured"
        );
        Ok(automation)
    }

    /// Enable or disable; enabling clears the failure streak and reschedules
    pub fn set_active(&self, automation_id: Uuid, active: bool) -> EngineResult<ProcessAutomation> {
        let now = Utc::now();
        let automation = self.persistence.transaction(|store| {
            let automation = store
                .automation_mut(automation_id)
                .ok_or_else(|| EngineError::not_found(EntityRef::Automation(automation_id)))?;
            automation.is_active = active;
            automation.updated_at = now;
            if active {
                automation.consecutive_failures = 0;
                automation.next_run = next_scheduled(&automation.trigger, now);
            }
            Ok(automation.clone())
        })?;
        tracing::info!(automation_id = %automation_id, active, "Automation toggled");
        Ok(automation)
    }

    pub fn get(&self, automation_id: Uuid) -> EngineResult<ProcessAutomation> {
        self.persistence
            .read(|store| store.automation(automation_id).cloned())
            .ok_or_else(|| EngineError::not_found(EntityRef::Automation(automation_id)))
    }

    pub fn list(&self, company_id: CompanyId) -> Vec<ProcessAutomation> {
        self.persistence.read(|store| {
            let mut automations: Vec<_> = store
                .automations
                .iter()
                .filter(|a| a.company_id == company_id)
                .cloned()
                .collect();
            automations.sort_by(|a, b| a.name.cmp(&b.name));
            automations
        })
    }

    /// Executions of an automation, newest first
    pub fn history(&self, automation_id: Uuid, limit: usize) -> EngineResult<Vec<AutomationExecution>> {
        self.persistence
            .read(|store| {
                store.automation(automation_id)?;
                Some(store.executions_for(automation_id, limit))
            })
            .ok_or_else(|| EngineError::not_found(EntityRef::Automation(automation_id)))
    }

    // ---------------------------------------------------------------- execution

    /// Run immediately, bypassing schedule and conditions
    pub async fn run_now(&self, automation_id: Uuid, user_id: UserId) -> EngineResult<AutomationExecution> {
        let entity = EntityRef::Automation(automation_id);
        let Some(_guard) = self.locks.try_acquire(automation_id) else {
            return Err(EngineError::LockContention { entity });
        };

        let now = Utc::now();
        let lease = self.settings.claim_lease;
        let (automation, input) = self.persistence.transaction(|store| {
            let automation = store
                .automation(automation_id)
                .cloned()
                .ok_or_else(|| EngineError::not_found(entity.clone()))?;
            if !automation.is_active {
                return Err(EngineError::invalid_state(entity.clone(), "inactive", "run"));
            }
            if bound_workflow_terminal(store, &automation) {
                return Err(EngineError::invalid_state(
                    entity.clone(),
                    "bound to a finished workflow",
                    "run",
                ));
            }
            if is_claimed(&automation, now) {
                return Err(EngineError::LockContention {
                    entity: entity.clone(),
                });
            }
            let input = execution_input(&automation, store.company_facts(automation.company_id, now));
            if let Some(a) = store.automation_mut(automation_id) {
                a.claimed_until = Some(now + lease);
            }
            Ok((automation, input))
        })?;

        let attempt = automation.consecutive_failures + 1;
        let (execution, disabled) = self
            .run_locked(&automation, TriggerSource::Manual { user_id }, input, attempt, now, false)
            .await?;
        if disabled {
            tracing::debug!(automation_id = %automation_id, "Manual run disabled the automation");
        }
        Ok(execution)
    }

    /// One scheduler pass
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            overdue: self.engine.sweep_overdue(now).await.overdue,
            drained: self.engine.drain_active().await,
            ..TickReport::default()
        };

        let cooldown = self.settings.conditional_cooldown_minutes;
        let due: Vec<Uuid> = self.persistence.read(|store| {
            store
                .automations
                .iter()
                .filter(|a| due_now(store, a, now, cooldown).is_some())
                .map(|a| a.id)
                .collect()
        });
        if due.is_empty() {
            tracing::debug!("No automations due");
            return report;
        }

        let dispatches = join_all(due.into_iter().map(|id| async move {
            let Ok(_permit) = self.workers.acquire().await else {
                return Dispatch::Skipped;
            };
            self.dispatch(id, now).await
        }))
        .await;

        for dispatch in dispatches {
            match dispatch {
                Dispatch::Executed { disabled } => {
                    report.executed += 1;
                    if disabled {
                        report.disabled += 1;
                    }
                }
                Dispatch::Skipped => report.skipped += 1,
            }
        }

        tracing::info!(
            executed = report.executed,
            skipped = report.skipped,
            disabled = report.disabled,
            overdue = report.overdue,
            "Scheduler tick finished"
        );
        report
    }

    async fn dispatch(&self, automation_id: Uuid, now: DateTime<Utc>) -> Dispatch {
        let Some(_guard) = self.locks.try_acquire(automation_id) else {
            tracing::debug!(automation_id = %automation_id, "Automation already running, skipped");
            return Dispatch::Skipped;
        };

        let claimed = match self.claim(automation_id, now) {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::warn!(automation_id = %automation_id, error = %e, "Failed to claim automation");
                return Dispatch::Skipped;
            }
        };
        let Some((automation, source, input, attempt)) = claimed else {
            return Dispatch::Skipped;
        };

        match self.run_locked(&automation, source, input, attempt, now, true).await {
            Ok((_, disabled)) => Dispatch::Executed { disabled },
            Err(e) => {
                tracing::warn!(automation_id = %automation_id, error = %e, "Failed to record execution");
                Dispatch::Skipped
            }
        }
    }

    /// Re-check against the latest store and mark the automation as running
    ///
    /// Another tick, here or in another process, may have run it since the scan. A
    /// scheduled run whose conditions no longer hold only advances its schedule.
    fn claim(
        &self,
        automation_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<(ProcessAutomation, TriggerSource, serde_json::Value, u32)>> {
        let cooldown = self.settings.conditional_cooldown_minutes;
        let lease = self.settings.claim_lease;
        self.persistence.transaction(|store| {
            let Some(automation) = store.automation(automation_id).cloned() else {
                return Ok(None);
            };
            let Some(due) = due_now(store, &automation, now, cooldown) else {
                return Ok(None);
            };
            let a = store
                .automation_mut(automation_id)
                .ok_or_else(|| EngineError::not_found(EntityRef::Automation(automation_id)))?;
            match due {
                Due::Advance => {
                    a.next_run = next_scheduled(&a.trigger, now);
                    a.updated_at = now;
                    tracing::debug!(automation_id = %automation_id, "Conditions unmet, run skipped");
                    Ok(None)
                }
                Due::Run {
                    source,
                    input,
                    attempt,
                } => {
                    a.claimed_until = Some(now + lease);
                    Ok(Some((automation, source, input, attempt)))
                }
            }
        })
    }

    /// Execute the action and record the outcome; caller holds the automation lock
    async fn run_locked(
        &self,
        automation: &ProcessAutomation,
        source: TriggerSource,
        input: serde_json::Value,
        attempt: u32,
        now: DateTime<Utc>,
        reschedule: bool,
    ) -> EngineResult<(AutomationExecution, bool)> {
        let start_time = Utc::now();
        let result = self.executor.execute(automation, &input).await;
        let end_time = Utc::now();
        let discarded = self.workflow_is_terminal(automation);

        let (execution_status, output_data, error_details) = match &result {
            _ if discarded => (
                ExecutionStatus::Discarded,
                result.as_ref().ok().map(|o| o.output.clone()),
                None,
            ),
            Ok(outcome) if outcome.partial => {
                (ExecutionStatus::Partial, Some(outcome.output.clone()), None)
            }
            Ok(outcome) => (ExecutionStatus::Success, Some(outcome.output.clone()), None),
            Err(e) => (
                ExecutionStatus::Failed,
                None,
                serde_json::to_value(e.report()).ok(),
            ),
        };

        let execution = AutomationExecution {
            id: Uuid::new_v4(),
            automation_id: automation.id,
            execution_status,
            attempt,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
            input_data: input,
            output_data,
            error_details,
            triggered_by: source,
            execution_context: Some(serde_json::json!({
                "automation_type": automation.automation_type(),
                "scheduled_for": automation.next_run,
            })),
        };

        let policy = automation.retry_config.clone();
        let updated = self.persistence.transaction(|store| {
            let a = store
                .automation_mut(automation.id)
                .ok_or_else(|| EngineError::not_found(EntityRef::Automation(automation.id)))?;
            a.run_count += 1;
            a.last_run = Some(now);
            a.updated_at = end_time;
            a.claimed_until = None;

            match execution_status {
                ExecutionStatus::Success => {
                    a.success_count += 1;
                    a.consecutive_failures = 0;
                    if reschedule {
                        a.next_run = next_scheduled(&a.trigger, now);
                    }
                }
                // Not a success: the failure streak carries over
                ExecutionStatus::Partial | ExecutionStatus::Discarded => {
                    if reschedule {
                        a.next_run = next_scheduled(&a.trigger, now);
                    }
                }
                ExecutionStatus::Failed => {
                    a.failure_count += 1;
                    a.consecutive_failures += 1;
                    if a.consecutive_failures >= policy.max_attempts {
                        a.is_active = false;
                        a.next_run = None;
                    } else {
                        let delay = schedule::retry_delay(&policy, a.consecutive_failures - 1);
                        a.next_run = Some(now + Duration::seconds(delay.as_secs() as i64));
                    }
                }
            }
            let updated = a.clone();
            store.executions.push(execution.clone());
            Ok(updated)
        })?;

        let disabled = execution_status == ExecutionStatus::Failed && !updated.is_active;
        match (&result, disabled) {
            (Err(e), true) => logging::log_automation_disabled(
                updated.id,
                &updated.name,
                updated.consecutive_failures,
                &e.to_string(),
            ),
            (Err(e), false) => tracing::warn!(
                automation_id = %updated.id,
                attempt,
                next_retry = updated.next_run.map(|t| t.to_rfc3339()).unwrap_or_default(),
                error = %e,
                "Automation failed, will retry"
            ),
            (Ok(_), _) => tracing::info!(
                automation_id = %updated.id,
                status = ?execution_status,
                duration_ms = execution.duration_ms,
                "Automation executed"
            ),
        }
        Ok((execution, disabled))
    }

    fn workflow_is_terminal(&self, automation: &ProcessAutomation) -> bool {
        self.persistence
            .read(|store| bound_workflow_terminal(store, automation))
    }

    /// Tick every poll interval until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            poll_interval_seconds = self.settings.poll_interval.as_secs(),
            workers = self.settings.worker_pool_size,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.persistence.refresh() {
                        tracing::warn!(error = %e, "Failed to reload store");
                    }
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

fn next_scheduled(trigger: &TriggerConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        TriggerConfig::Scheduled { schedule } => schedule::next_after(schedule, now),
        TriggerConfig::Triggered { .. } | TriggerConfig::Conditional { .. } => None,
    }
}

fn bound_workflow_terminal(store: &JsonStore, automation: &ProcessAutomation) -> bool {
    automation
        .workflow_id
        .is_some_and(|id| store.workflow(id).is_some_and(|w| w.status.is_terminal()))
}

fn is_claimed(automation: &ProcessAutomation, now: DateTime<Utc>) -> bool {
    automation.claimed_until.is_some_and(|until| until > now)
}

/// Facts plus action parameters
fn execution_input(automation: &ProcessAutomation, facts: serde_json::Value) -> serde_json::Value {
    let mut input = serde_json::json!({ "facts": facts });
    merge_object(&mut input, &automation.action_parameters);
    input
}

/// Whether an automation should run at `now`, and with what input
fn due_now(store: &JsonStore, automation: &ProcessAutomation, now: DateTime<Utc>, cooldown: u32) -> Option<Due> {
    if !automation.is_active || is_claimed(automation, now) {
        return None;
    }
    if let Some(workflow_id) = automation.workflow_id {
        if store.workflow(workflow_id).is_none_or(|w| w.status.is_terminal()) {
            return None;
        }
    }

    // Pending retry replays the failed input once its backoff has elapsed
    let last_failed = store
        .executions_for(automation.id, 1)
        .into_iter()
        .next()
        .filter(|e| e.execution_status == ExecutionStatus::Failed);
    if let Some(last) = last_failed.filter(|_| automation.consecutive_failures > 0) {
        if automation.next_run.is_none_or(|t| t > now) {
            return None;
        }
        return Some(Due::Run {
            source: last.triggered_by,
            input: last.input_data,
            attempt: automation.consecutive_failures + 1,
        });
    }

    let facts = || store.company_facts(automation.company_id, now);
    let conditions_hold = |facts: &serde_json::Value| {
        conditions::evaluate_all(&automation.trigger_conditions, facts)
    };

    match &automation.trigger {
        TriggerConfig::Scheduled { .. } => {
            if automation.next_run.is_none_or(|t| t > now) {
                return None;
            }
            let facts = facts();
            if !conditions_hold(&facts) {
                return Some(Due::Advance);
            }
            Some(Due::Run {
                source: TriggerSource::Schedule,
                input: execution_input(automation, facts),
                attempt: 1,
            })
        }
        TriggerConfig::Triggered {
            events,
            workflow_type,
        } => {
            let since = automation
                .last_run
                .map_or(automation.created_at, |t| t.max(automation.created_at));
            let matching: Vec<serde_json::Value> = store
                .logs_since(automation.company_id, since)
                .into_iter()
                .filter(|log| log.timestamp <= now && events.contains(&log.event_type))
                .filter(|log| {
                    workflow_type.as_ref().is_none_or(|wanted| {
                        store
                            .workflow(log.workflow_id)
                            .is_some_and(|w| w.workflow_type.as_ref() == Some(wanted))
                    })
                })
                .map(|log| {
                    serde_json::json!({
                        "workflow_id": log.workflow_id,
                        "task_id": log.task_id,
                        "event": log.event_type,
                        "timestamp": log.timestamp,
                    })
                })
                .collect();
            if matching.is_empty() || !conditions_hold(&facts()) {
                return None;
            }
            let mut input = serde_json::json!({ "events": matching });
            merge_object(&mut input, &automation.action_parameters);
            Some(Due::Run {
                source: TriggerSource::Event,
                input,
                attempt: 1,
            })
        }
        TriggerConfig::Conditional { cooldown_minutes } => {
            let cooldown = Duration::minutes(cooldown_minutes.unwrap_or(cooldown) as i64);
            if automation.last_run.is_some_and(|t| now < t + cooldown) {
                return None;
            }
            let facts = facts();
            if !conditions_hold(&facts) {
                return None;
            }
            Some(Due::Run {
                source: TriggerSource::Condition,
                input: execution_input(automation, facts),
                attempt: 1,
            })
        }
    }
}
