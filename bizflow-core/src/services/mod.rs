//! Ambient services: logging and external collaborators

pub mod collaborators;
pub mod logging;

pub use collaborators::*;
