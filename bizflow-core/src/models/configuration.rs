//! Configuration data structures

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::automation::RetryPolicy;
use crate::models::workflow::UserId;
use crate::workflow::validator::WorkflowValidator;

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Static group membership for the built-in directory
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DirectoryConfig {
    /// Group or role name to member user ids, first member preferred
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<UserId>>,
    /// Users allowed to act with the administrator override
    #[serde(default)]
    pub admins: Vec<UserId>,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    /// JSON store file
    pub store_path: PathBuf,
    /// Logging verbosity level
    pub log_level: LogLevel,
    /// Scheduler polling interval
    pub poll_interval_seconds: u64,
    /// Maximum automations executing at once
    pub worker_pool_size: usize,
    /// How long to wait for a per-workflow lock
    pub lock_timeout_ms: u64,
    /// Bound on directory, notifier, webhook and handler calls
    pub collaborator_timeout_seconds: u64,
    /// Retry policy for automations that do not set one
    pub default_retry_policy: RetryPolicy,
    /// Minimum gap between two firings of a conditional automation
    pub conditional_cooldown_minutes: u32,
    pub directory: DirectoryConfig,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            log_level: LogLevel::Info,
            poll_interval_seconds: 60,
            worker_pool_size: 4,
            lock_timeout_ms: 5000,
            collaborator_timeout_seconds: 10,
            default_retry_policy: RetryPolicy::default(),
            conditional_cooldown_minutes: 60,
            directory: DirectoryConfig::default(),
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bizflow")
        .join("store.json")
}

impl EngineConfiguration {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: EngineConfiguration =
                toml::from_str(&content).context("Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(EngineConfiguration::default())
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("bizflow").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(1..=3600).contains(&self.poll_interval_seconds) {
            errors.push("poll_interval_seconds must be between 1 and 3600".to_string());
        }

        if !(1..=64).contains(&self.worker_pool_size) {
            errors.push("worker_pool_size must be between 1 and 64".to_string());
        }

        if self.lock_timeout_ms == 0 {
            errors.push("lock_timeout_ms must be greater than 0".to_string());
        }

        if !(1..=300).contains(&self.collaborator_timeout_seconds) {
            errors.push("collaborator_timeout_seconds must be between 1 and 300".to_string());
        }

        if self.store_path.as_os_str().is_empty() {
            errors.push("store_path cannot be empty".to_string());
        }

        for (group, members) in &self.directory.groups {
            if group.trim().is_empty() {
                errors.push("directory group names cannot be empty".to_string());
            }
            if members.is_empty() {
                errors.push(format!("directory group '{}' has no members", group));
            }
        }

        let retry = WorkflowValidator::validate_retry_policy(&self.default_retry_policy);
        errors.extend(
            retry
                .errors
                .into_iter()
                .map(|e| format!("default_retry_policy.{}: {}", e.field, e.message)),
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_configuration() {
        let config = EngineConfiguration::default();
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.default_retry_policy.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configuration_validation() {
        let config = EngineConfiguration {
            poll_interval_seconds: 0,
            worker_pool_size: 100,
            collaborator_timeout_seconds: 0,
            ..EngineConfiguration::default()
        };

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("poll_interval_seconds")));
        assert!(errors.iter().any(|e| e.contains("worker_pool_size")));
        assert!(errors.iter().any(|e| e.contains("collaborator_timeout_seconds")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
log_level = "debug"
worker_pool_size = 2

[directory]
admins = [1]

[directory.groups]
finance_manager = [7, 8]
"#,
        )
        .unwrap();

        let config = EngineConfiguration::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.directory.groups["finance_manager"], vec![7, 8]);
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let config = EngineConfiguration {
            store_path: temp_dir.path().join("store.json"),
            poll_interval_seconds: 15,
            ..EngineConfiguration::default()
        };

        config.save_to_file(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = EngineConfiguration::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.poll_interval_seconds, 15);
        assert_eq!(loaded.store_path, temp_dir.path().join("store.json"));
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let temp_dir = tempdir().unwrap();
        let config =
            EngineConfiguration::load_from_file(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.lock_timeout_ms, 5000);
    }
}
