// src/config/loader.rs

use crate::config::{AppConfig, ConfigValidator};
use crate::error::{EngineError, Result};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const KEYS_ENV_PREFIX: &str = "CHAT_RELAY_API_KEYS_";

/// Load configuration from file or environment variables
pub fn load_config(config_path: &Path) -> Result<AppConfig> {
    let mut config = if config_path.exists() {
        info!("Loading configuration from file: {}", config_path.display());
        load_from_file(config_path)?
    } else {
        info!("Configuration file not found, using defaults");
        AppConfig::default()
    };

    override_with_env(&mut config);

    ConfigValidator::validate(&config)?;

    debug!("Configuration loaded and validated successfully");
    Ok(config)
}

/// Parse configuration from YAML text without touching the environment.
pub fn parse_config(content: &str) -> Result<AppConfig> {
    serde_yaml::from_str(content).map_err(|e| EngineError::Config {
        message: format!(
            "Failed to parse config (line {}): {}",
            e.location().map_or(0, |loc| loc.line()),
            e
        ),
        field: None,
    })
}

fn load_from_file(config_path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(config_path).map_err(|e| EngineError::Io {
        operation: "read_config".to_string(),
        message: format!("{}: {e}", config_path.display()),
    })?;
    parse_config(&content)
}

fn override_with_env(config: &mut AppConfig) {
    for (name, value) in std::env::vars() {
        let Some(provider) = name.strip_prefix(KEYS_ENV_PREFIX) else {
            continue;
        };
        let keys: Vec<SecretString> = value
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::new(k.to_string()))
            .collect();
        if keys.is_empty() {
            warn!("Ignoring empty {} environment variable", name);
            continue;
        }
        let provider = provider.to_lowercase();
        info!(provider = %provider, count = keys.len(), "Overriding API keys from environment variable");
        config.api_keys.insert(provider, keys);
    }

    if let Ok(state_path) = std::env::var("CHAT_RELAY_STATE_PATH") {
        info!("Overriding key state path from environment variable");
        config.storage.state_path = PathBuf::from(state_path);
    }

    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        info!("Overriding Redis URL from environment variable");
        config.storage.redis_url = Some(redis_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextManagement, HealthMode};
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
provider_priority: [gemini, groq, openai]
models:
  gemini: gemini-1.5-pro-latest
  groq: llama3-70b-8192
  openai: gpt-4o
api_keys:
  gemini: ["AIza-test-1"]
  groq: ["gsk-test-1", "gsk-test-2"]
  openai: ["sk-test-1"]
caching:
  enabled: true
  ttl_seconds: 60
context_management:
  strategy: sliding_window
  max_messages: 10
prompting:
  system_prompt: "You are a support assistant for an online shop."
health:
  mode: reactivate_only
tools:
  - name: lookup_order
    description: Look up an order by id.
    parameters:
      type: object
      properties:
        order_id: { type: string }
      required: [order_id]
"#;

    #[test]
    fn parses_full_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.provider_priority, vec!["gemini", "groq", "openai"]);
        assert_eq!(config.keys_for("groq").len(), 2);
        assert_eq!(config.keys_for("groq")[1].expose_secret(), "gsk-test-2");
        assert_eq!(
            config.context_management,
            Some(ContextManagement::SlidingWindow { max_messages: 10 })
        );
        assert_eq!(config.health.mode, HealthMode::ReactivateOnly);
        assert_eq!(config.health.interval().as_secs(), 60);
        assert_eq!(config.tools[0].name, "lookup_order");
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.max_tool_iterations, 5);
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn reports_parse_errors_as_config_errors() {
        let err = parse_config("provider_priority: {").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn missing_file_falls_back_to_defaults_and_fails_validation() {
        let err = load_config(Path::new("/nonexistent/chat-relay.yaml")).unwrap_err();
        assert!(err.to_string().contains("provider_priority"));
    }
}
