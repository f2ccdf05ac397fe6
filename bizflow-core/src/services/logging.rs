//! Logging service

use crate::models::{Actor, LogLevel, WorkflowEvent};
use uuid::Uuid;

/// Initialize logging with the specified level
pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match level {
        LogLevel::Error => "bizflow=error,bizflow_core=error",
        LogLevel::Warn => "bizflow=warn,bizflow_core=warn",
        LogLevel::Info => "bizflow=info,bizflow_core=info",
        LogLevel::Debug => "bizflow=debug,bizflow_core=debug",
        LogLevel::Trace => "bizflow=trace,bizflow_core=trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()?;

    Ok(())
}

/// Log a workflow lifecycle or task event
pub fn log_workflow_event(
    event: WorkflowEvent,
    workflow_id: Uuid,
    task_id: Option<Uuid>,
    actor: Actor,
) {
    tracing::info!(
        event = ?event,
        workflow_id = %workflow_id,
        task_id = task_id.map(|id| id.to_string()).unwrap_or_default(),
        actor = %actor,
        "Workflow event"
    );
}

/// Log an automation disabled after exhausting its retries (always error level)
pub fn log_automation_disabled(automation_id: Uuid, name: &str, failures: u32, last_error: &str) {
    tracing::error!(
        automation_id = %automation_id,
        automation = name,
        consecutive_failures = failures,
        last_error = last_error,
        "Automation disabled after exhausting retries"
    );
}

/// Log an overdue task escalation
pub fn log_escalation(workflow_id: Uuid, task_id: Uuid, reassigned_to: Option<u64>) {
    tracing::warn!(
        workflow_id = %workflow_id,
        task_id = %task_id,
        reassigned_to = reassigned_to.map(|id| id.to_string()).unwrap_or_default(),
        "Task overdue, escalated"
    );
}
