//! # Bizflow Core Library
//!
//! Business-process engine: workflow templates, dependent task graphs, multi-level
//! approval routing and scheduled, triggered or conditional automations.

pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use error::{EngineError, EngineResult, EntityRef, ErrorKind};
pub use workflow::BizflowOrchestrator;
