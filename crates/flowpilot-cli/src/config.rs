//! Application configuration.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file, then
//! environment variables (after `.env` has been loaded).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use flowpilot_engine::{EngineConfig, WorkflowPreferences};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/flowpilot.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `compact` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub job_type: String,
    pub default_poll_interval_secs: u64,
    pub event_bus_capacity: usize,
    pub job_retention: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            job_type: engine.job_type,
            default_poll_interval_secs: engine.default_poll_interval_secs,
            event_bus_capacity: engine.event_bus_capacity,
            job_retention: engine.job_retention,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `anthropic` or `openai`.
    pub provider: String,
    pub model: String,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    pub max_tokens: u32,
    /// Filled from `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`, never from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-20250514".into(),
            base_url: None,
            max_tokens: 2048,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub suggestion_limit: usize,
    /// Used for owners that never stored preferences.
    pub preferences: WorkflowPreferences,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            suggestion_limit: engine.suggestion_limit,
            preferences: engine.preferences,
        }
    }
}

impl AppConfig {
    /// Load `.env`, then `path` (a missing file yields defaults), then the
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        // a missing .env is fine
        let _ = dotenvy::dotenv();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&content).with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("FLOWPILOT_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("FLOWPILOT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(provider) = lookup("FLOWPILOT_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = lookup("FLOWPILOT_LLM_MODEL") {
            self.llm.model = model;
        }
        let key_var = match self.llm.provider.as_str() {
            "openai" | "openai-compatible" => "OPENAI_API_KEY",
            _ => "ANTHROPIC_API_KEY",
        };
        self.llm.api_key = lookup(key_var).filter(|k| !k.trim().is_empty());
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            bail!("database.path must not be empty");
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            bail!(
                "invalid logging.level `{}`: expected trace, debug, info, warn or error",
                self.logging.level
            );
        }
        if !["compact", "json"].contains(&self.logging.format.as_str()) {
            bail!("invalid logging.format `{}`: expected compact or json", self.logging.format);
        }
        self.workflow.preferences.validate()?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            job_type: self.scheduler.job_type.clone(),
            default_poll_interval_secs: self.scheduler.default_poll_interval_secs,
            suggestion_limit: self.workflow.suggestion_limit,
            event_bus_capacity: self.scheduler.event_bus_capacity,
            job_retention: self.scheduler.job_retention,
            preferences: self.workflow.preferences.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            path = "/tmp/fp.db"

            [logging]
            format = "json"

            [workflow.preferences]
            auto_approve = true
            confidence_threshold = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/fp.db"));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        let engine = config.engine_config();
        assert!(engine.preferences.auto_approve);
        assert_eq!(engine.preferences.min_priority, 5);
    }

    #[test]
    fn environment_wins() {
        let env: HashMap<&str, &str> = [
            ("FLOWPILOT_DB_PATH", "/var/lib/fp.db"),
            ("FLOWPILOT_LLM_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "ignored"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database.path, PathBuf::from("/var/lib/fp.db"));
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let mut config = AppConfig::default();
        config.logging.format = "pretty".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }
}
