//! CLI command handling

pub mod approval;
pub mod approval_handlers;
pub mod automation;
pub mod automation_handlers;
pub mod context;
pub mod handlers;
pub mod task;
pub mod task_handlers;
pub mod template;
pub mod template_handlers;
pub mod workflow;
pub mod workflow_handlers;
