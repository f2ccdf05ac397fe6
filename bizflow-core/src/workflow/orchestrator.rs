//! Engine facade wiring every component around one store

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::models::EngineConfiguration;
use crate::services::collaborators::{Directory, HandlerRegistry, Notifier};
use crate::workflow::engine::{EngineSettings, WorkflowEngine};
use crate::workflow::persistence::WorkflowPersistence;
use crate::workflow::router::ApprovalRouter;
use crate::workflow::scheduler::{AutomationScheduler, SchedulerSettings};
use crate::workflow::templates::TemplateStore;

/// Templates, approval routing, workflow engine and scheduler sharing one store
pub struct BizflowOrchestrator {
    persistence: Arc<WorkflowPersistence>,
    templates: TemplateStore,
    approvals: ApprovalRouter,
    engine: Arc<WorkflowEngine>,
    scheduler: Arc<AutomationScheduler>,
}

impl BizflowOrchestrator {
    /// Open the store named by the configuration
    pub fn open(
        config: &EngineConfiguration,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        handlers: HandlerRegistry,
    ) -> Result<Self> {
        if let Err(errors) = config.validate() {
            anyhow::bail!("Invalid configuration: {}", errors.join("; "));
        }
        let persistence = WorkflowPersistence::new(&config.store_path).with_context(|| {
            format!("Failed to open store {}", config.store_path.display())
        })?;
        tracing::info!(store = %config.store_path.display(), "Store opened");
        Ok(Self::assemble(
            Arc::new(persistence),
            config,
            directory,
            notifier,
            handlers,
        ))
    }

    /// Same wiring over a store that never touches disk
    pub fn in_memory(
        config: &EngineConfiguration,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self::assemble(
            Arc::new(WorkflowPersistence::in_memory()),
            config,
            directory,
            notifier,
            handlers,
        )
    }

    fn assemble(
        persistence: Arc<WorkflowPersistence>,
        config: &EngineConfiguration,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        handlers: HandlerRegistry,
    ) -> Self {
        let engine = Arc::new(WorkflowEngine::new(
            persistence.clone(),
            directory,
            notifier,
            handlers,
            EngineSettings::from_config(config),
        ));
        let scheduler = Arc::new(AutomationScheduler::new(
            engine.clone(),
            SchedulerSettings::from_config(config),
        ));

        Self {
            templates: TemplateStore::new(persistence.clone()),
            approvals: ApprovalRouter::new(persistence.clone()),
            persistence,
            engine,
            scheduler,
        }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn approvals(&self) -> &ApprovalRouter {
        &self.approvals
    }

    pub fn engine(&self) -> Arc<WorkflowEngine> {
        self.engine.clone()
    }

    pub fn scheduler(&self) -> Arc<AutomationScheduler> {
        self.scheduler.clone()
    }

    /// Reload the store from disk, picking up writes from other processes
    pub fn refresh(&self) -> Result<()> {
        self.persistence.refresh()
    }
}
