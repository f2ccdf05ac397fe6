//! Data models for bizflow

pub mod approval;
pub mod automation;
pub mod configuration;
pub mod template;
pub mod workflow;

pub use approval::*;
pub use automation::*;
pub use configuration::*;
pub use template::*;
pub use workflow::*;
