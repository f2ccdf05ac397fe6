//! Shared wiring for command handlers

use anyhow::{Context, Result};
use bizflow_core::models::{CompanyId, EngineConfiguration, Performer, UserId};
use bizflow_core::services::{HandlerRegistry, LogNotifier, StaticDirectory};
use bizflow_core::BizflowOrchestrator;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Configuration and company scope every command runs under
pub struct CliContext {
    pub config: EngineConfiguration,
    pub config_path: PathBuf,
    pub company: CompanyId,
}

impl CliContext {
    /// Load the configuration file, or defaults when it does not exist
    pub fn load(config_file: Option<PathBuf>, company: CompanyId) -> Result<Self> {
        let config_path = match config_file {
            Some(path) => path,
            None => EngineConfiguration::default_config_path()
                .context("Failed to get default config path")?,
        };
        let config = EngineConfiguration::load_from_file(&config_path)?;
        Ok(Self {
            config,
            config_path,
            company,
        })
    }

    /// Open the file-backed store with the built-in directory and log notifier
    pub fn orchestrator(&self) -> Result<BizflowOrchestrator> {
        BizflowOrchestrator::open(
            &self.config,
            Arc::new(StaticDirectory::new(self.config.directory.clone())),
            Arc::new(LogNotifier),
            HandlerRegistry::new(),
        )
    }
}

/// Acting user, optionally with the administrator override
pub fn performer(user: UserId, admin: bool) -> Performer {
    if admin {
        Performer::admin(user)
    } else {
        Performer::user(user)
    }
}

/// Read a YAML or JSON document; `.json` files are parsed as JSON
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON document {}", path.display()))
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML document {}", path.display()))
    }
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid ID format: {}", raw))
}

/// Parse an inline JSON argument such as `--data '{"amount": 10}'`
pub fn parse_json_arg(raw: Option<String>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).context("Argument is not valid JSON"))
        .transpose()
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
