//! Workflow engine, approval routing and automation scheduling

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod locks;
pub mod orchestrator;
pub mod persistence;
pub mod queries;
pub mod router;
pub mod schedule;
pub mod scheduler;
pub mod templates;
pub mod transitions;
pub mod validator;

pub use actions::*;
pub use engine::*;
pub use orchestrator::*;
pub use persistence::*;
pub use queries::*;
pub use router::*;
pub use scheduler::*;
pub use templates::*;
pub use validator::*;
