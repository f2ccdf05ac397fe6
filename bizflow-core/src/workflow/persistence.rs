//! Engine state persistence using JSON file storage
//!
//! Every mutation runs inside [`WorkflowPersistence::transaction`]: the closure works on a
//! copy of the store, and the copy replaces the live store only after it has been
//! flushed to disk. A failing closure or a failing flush leaves nothing behind.

use crate::error::{EngineError, EngineResult};
use crate::models::{
    ApprovalWorkflow, AutomationExecution, CompanyId, ProcessAutomation, TaskStatus, Workflow,
    WorkflowAction, WorkflowLog, WorkflowStatus, WorkflowTask, WorkflowTemplate,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Root JSON store containing all engine data
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JsonStore {
    #[serde(default)]
    pub templates: Vec<WorkflowTemplate>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
    #[serde(default)]
    pub approval_rules: Vec<ApprovalWorkflow>,
    #[serde(default)]
    pub automations: Vec<ProcessAutomation>,
    #[serde(default)]
    pub executions: Vec<AutomationExecution>,
    /// Append-only
    #[serde(default)]
    actions: Vec<WorkflowAction>,
    /// Append-only
    #[serde(default)]
    logs: Vec<WorkflowLog>,
}

impl JsonStore {
    pub fn template(&self, id: Uuid) -> Option<&WorkflowTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn workflow(&self, id: Uuid) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.id == id)
    }

    pub fn workflow_mut(&mut self, id: Uuid) -> Option<&mut Workflow> {
        self.workflows.iter_mut().find(|w| w.id == id)
    }

    pub fn task(&self, id: Uuid) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: Uuid) -> Option<&mut WorkflowTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Tasks of a workflow ordered by step, then creation
    pub fn tasks_of(&self, workflow_id: Uuid) -> Vec<&WorkflowTask> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.workflow_id == workflow_id)
            .collect();
        tasks.sort_by_key(|t| (t.step_number, t.created_at));
        tasks
    }

    pub fn approval_rule(&self, id: Uuid) -> Option<&ApprovalWorkflow> {
        self.approval_rules.iter().find(|r| r.id == id)
    }

    pub fn automation(&self, id: Uuid) -> Option<&ProcessAutomation> {
        self.automations.iter().find(|a| a.id == id)
    }

    pub fn automation_mut(&mut self, id: Uuid) -> Option<&mut ProcessAutomation> {
        self.automations.iter_mut().find(|a| a.id == id)
    }

    pub fn append_action(&mut self, action: WorkflowAction) {
        self.actions.push(action);
    }

    pub fn append_log(&mut self, log: WorkflowLog) {
        self.logs.push(log);
    }

    pub fn actions(&self) -> &[WorkflowAction] {
        &self.actions
    }

    pub fn logs(&self) -> &[WorkflowLog] {
        &self.logs
    }

    pub fn actions_for_task(&self, task_id: Uuid) -> Vec<WorkflowAction> {
        self.actions
            .iter()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Workflow logs, newest first
    pub fn logs_for_workflow(&self, workflow_id: Uuid) -> Vec<WorkflowLog> {
        let mut logs: Vec<_> = self
            .logs
            .iter()
            .filter(|l| l.workflow_id == workflow_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs
    }

    /// Company logs written strictly after `since`, oldest first
    pub fn logs_since(&self, company_id: CompanyId, since: DateTime<Utc>) -> Vec<&WorkflowLog> {
        self.logs
            .iter()
            .filter(|l| l.company_id == company_id && l.timestamp > since)
            .collect()
    }

    /// Executions of an automation, newest first
    pub fn executions_for(&self, automation_id: Uuid, limit: usize) -> Vec<AutomationExecution> {
        let mut executions: Vec<_> = self
            .executions
            .iter()
            .filter(|e| e.automation_id == automation_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        executions.truncate(limit);
        executions
    }

    fn company_tasks(&self, company_id: CompanyId) -> impl Iterator<Item = &WorkflowTask> {
        self.tasks.iter().filter(move |t| {
            self.workflow(t.workflow_id)
                .is_some_and(|w| w.company_id == company_id)
        })
    }

    /// Workflow count per status; every status present
    pub fn workflow_stats_by_status(&self, company_id: CompanyId) -> BTreeMap<WorkflowStatus, usize> {
        let mut stats: BTreeMap<_, _> = WorkflowStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for workflow in self.workflows.iter().filter(|w| w.company_id == company_id) {
            *stats.entry(workflow.status).or_insert(0) += 1;
        }
        stats
    }

    /// Task count per status; every status present
    pub fn task_stats_by_status(&self, company_id: CompanyId) -> BTreeMap<TaskStatus, usize> {
        let mut stats: BTreeMap<_, _> = TaskStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for task in self.company_tasks(company_id) {
            *stats.entry(task.status).or_insert(0) += 1;
        }
        stats
    }

    /// Workflows created per UTC day over the seven days ending at `now`
    pub fn weekly_workflow_activity(
        &self,
        company_id: CompanyId,
        now: DateTime<Utc>,
    ) -> Vec<DailyActivity> {
        let today = now.date_naive();
        (0..7)
            .rev()
            .map(|offset| {
                let date = today - Duration::days(offset);
                let created = self
                    .workflows
                    .iter()
                    .filter(|w| w.company_id == company_id && w.created_at.date_naive() == date)
                    .count();
                DailyActivity { date, created }
            })
            .collect()
    }

    /// Counts used to evaluate automation trigger conditions
    pub fn company_facts(&self, company_id: CompanyId, now: DateTime<Utc>) -> serde_json::Value {
        let workflows: serde_json::Map<_, _> = self
            .workflow_stats_by_status(company_id)
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count.into()))
            .collect();
        let mut tasks: serde_json::Map<_, _> = self
            .task_stats_by_status(company_id)
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count.into()))
            .collect();
        let past_due = self
            .company_tasks(company_id)
            .filter(|t| t.is_overdue(now))
            .count();
        tasks.insert("past_due".to_string(), past_due.into());

        serde_json::json!({
            "company_id": company_id,
            "workflows": workflows,
            "tasks": tasks,
            "now": now.to_rfc3339(),
        })
    }
}

/// Workflows created on one day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub created: usize,
}

/// Engine persistence manager
pub struct WorkflowPersistence {
    /// Path to JSON store file; `None` keeps everything in memory
    store_path: Option<PathBuf>,
    /// In-memory data store
    store: Arc<Mutex<JsonStore>>,
}

impl WorkflowPersistence {
    /// Create new persistence manager backed by a file
    pub fn new<P: AsRef<Path>>(store_path: P) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();

        // Create parent directory if it doesn't exist
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let store = if store_path.exists() {
            Self::load_store(&store_path)?
        } else {
            JsonStore::default()
        };

        Ok(Self {
            store_path: Some(store_path),
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// Create a persistence manager that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            store_path: None,
            store: Arc::new(Mutex::new(JsonStore::default())),
        }
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    fn guard(&self) -> MutexGuard<'_, JsonStore> {
        // A panic mid-transaction never reaches the live store, so the data is intact
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load JSON store from file with file locking
    fn load_store(path: &Path) -> Result<JsonStore> {
        let file = File::open(path).context("Failed to open store file")?;

        // Acquire shared lock for reading
        file.lock_shared()
            .context("Failed to acquire read lock on store")?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(file);
        reader
            .read_to_string(&mut contents)
            .context("Failed to read store")?;

        drop(reader);

        if contents.trim().is_empty() {
            return Ok(JsonStore::default());
        }

        serde_json::from_str(&contents).context("Failed to parse store JSON")
    }

    /// Save JSON store to file with file locking
    fn save_store(path: &Path, store: &JsonStore) -> Result<()> {
        let json = serde_json::to_string_pretty(store).context("Failed to serialize store")?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .context("Failed to open store file for writing")?;

        // Acquire exclusive lock before truncating
        file.lock_exclusive()
            .context("Failed to acquire write lock on store")?;
        file.set_len(0).context("Failed to truncate store")?;

        let mut writer = std::io::BufWriter::new(file);
        writer
            .write_all(json.as_bytes())
            .context("Failed to write store")?;

        writer.flush().context("Failed to flush store to disk")?;

        Ok(())
    }

    /// Lock held across a whole transaction so separate processes serialize writes
    fn lock_writers(path: &Path) -> Result<File> {
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .context("Failed to open store lock file")?;
        file.lock_exclusive()
            .context("Failed to acquire store transaction lock")?;
        Ok(file)
    }

    /// Run a unit of work against a copy of the store
    ///
    /// The copy is committed only when the closure succeeds and the flush succeeds.
    pub fn transaction<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: FnOnce(&mut JsonStore) -> EngineResult<T>,
    {
        let mut live = self.guard();

        let _writer_lock = match &self.store_path {
            Some(path) => {
                let lock = Self::lock_writers(path).map_err(EngineError::Storage)?;
                // Pick up commits from other processes
                if path.exists() {
                    *live = Self::load_store(path).map_err(EngineError::Storage)?;
                }
                Some(lock)
            }
            None => None,
        };

        let mut working = live.clone();
        let value = work(&mut working)?;

        if let Some(path) = &self.store_path {
            Self::save_store(path, &working).map_err(EngineError::Storage)?;
        }
        *live = working;

        Ok(value)
    }

    /// Read from a consistent snapshot
    pub fn read<T>(&self, query: impl FnOnce(&JsonStore) -> T) -> T {
        let store = self.guard();
        query(&store)
    }

    /// Reload from disk, discarding the in-memory view
    pub fn refresh(&self) -> Result<()> {
        if let Some(path) = &self.store_path {
            if path.exists() {
                let loaded = Self::load_store(path)?;
                *self.guard() = loaded;
            }
        }
        Ok(())
    }
}
