//! Shared helpers for the subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};
use flowpilot_agent::{DisabledGenerator, LlmClient, LlmClientConfig, LlmProvider, TextGenerator};
use flowpilot_store::{Database, Stores};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LlmConfig, LoggingConfig};

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber.  `RUST_LOG` wins over the configured
/// level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Open (creating if needed) and migrate the configured database.
pub async fn open_stores(config: &AppConfig) -> Result<Stores> {
    let path = config.database.path.clone();
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let db_path = path.display().to_string();
    let db = Database::open_and_migrate(path)
        .await
        .with_context(|| format!("failed to open database {db_path}"))?;
    info!(path = %db_path, "store initialized");
    Ok(Stores::new(db))
}

/// The configured LLM backend, or [`DisabledGenerator`] without an API key.
pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    let Some(api_key) = config.api_key.clone() else {
        warn!(provider = %config.provider, "no API key configured; generated insights and suggestions are off");
        return Ok(Arc::new(DisabledGenerator));
    };

    let provider = LlmProvider::parse(&config.provider)?;
    let client_config = match (provider, &config.base_url) {
        (LlmProvider::OpenAI, Some(base_url)) => {
            LlmClientConfig::openai_compatible(api_key, config.model.clone(), base_url.clone())
        }
        (LlmProvider::OpenAI, None) => LlmClientConfig::openai(api_key, config.model.clone()),
        (LlmProvider::Anthropic, base_url) => {
            let mut c = LlmClientConfig::anthropic(api_key, config.model.clone());
            if let Some(url) = base_url {
                c.base_url = url.clone();
            }
            c
        }
    }
    .with_max_tokens(config.max_tokens);

    let client = LlmClient::new(client_config).context("failed to build LLM client")?;
    info!(provider = provider.as_str(), model = %config.model, "text generation enabled");
    Ok(Arc::new(client))
}

// ---------------------------------------------------------------------------
// Input / output
// ---------------------------------------------------------------------------

/// Parse a JSON command-line argument.
pub fn parse_json(arg: &str, what: &str) -> Result<Value> {
    serde_json::from_str(arg).with_context(|| format!("--{what} is not valid JSON"))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_falls_back_without_key() {
        let generator = build_generator(&LlmConfig::default()).unwrap();
        assert_eq!(generator.name(), "disabled");
    }

    #[test]
    fn generator_uses_configured_provider() {
        let config = LlmConfig {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key: Some("sk-test".into()),
            ..LlmConfig::default()
        };
        let generator = build_generator(&config).unwrap();
        assert_eq!(generator.name(), "openai");
    }

    #[test]
    fn json_arguments_are_checked() {
        assert_eq!(parse_json(r#"{"a":1}"#, "data").unwrap()["a"], 1);
        let err = parse_json("{oops", "data").unwrap_err();
        assert!(err.to_string().contains("--data"));
    }

    #[tokio::test]
    async fn creates_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("nested").join("fp.db");
        let stores = open_stores(&config).await.unwrap();
        assert_eq!(stores.triggers.count().await.unwrap(), 0);
        assert!(config.database.path.exists());
    }
}
