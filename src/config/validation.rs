// src/config/validation.rs

use crate::config::{AppConfig, ContextManagement};
use crate::error::{EngineError, Result};
use crate::providers::AdapterRegistry;
use crate::utils::preview_key;
use secrecy::ExposeSecret;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Checks everything that can be decided from the configuration alone.
    pub fn validate(config: &AppConfig) -> Result<()> {
        debug!("Starting configuration validation");

        if let Err(e) = Self::validate_priority(config) {
            warn!("Provider priority validation failed: {}", e);
            return Err(e);
        }
        Self::validate_keys(config)?;
        Self::validate_base_urls(config)?;
        Self::validate_bounds(config)?;
        Self::validate_tools(config)?;

        debug!("Configuration validation completed successfully");
        Ok(())
    }

    /// Checks the prioritized providers against the adapters known at startup.
    ///
    /// A provider needs an adapter or a configured model, and keys unless its
    /// adapter declares it needs none.
    pub fn validate_against_adapters(config: &AppConfig, adapters: &AdapterRegistry) -> Result<()> {
        for provider in &config.provider_priority {
            let adapter = adapters.get(provider);
            let model = config.model_for(provider);

            if adapter.is_none() && model.is_none() {
                return Err(EngineError::config(
                    format!("Provider '{provider}' has neither a registered adapter nor a configured model"),
                    Some("provider_priority"),
                ));
            }
            if adapter.is_none() {
                warn!(provider = %provider, "No adapter registered; provider will be skipped during dispatch");
            } else if model.is_none() {
                warn!(provider = %provider, "No default model configured; provider will be skipped during dispatch");
            }

            let needs_key = adapter.map_or(true, |a| a.requires_key());
            if needs_key && config.keys_for(provider).is_empty() {
                return Err(EngineError::config(
                    format!("Provider '{provider}' requires at least one API key"),
                    Some("api_keys"),
                ));
            }
        }
        Ok(())
    }

    fn validate_priority(config: &AppConfig) -> Result<()> {
        if config.provider_priority.is_empty() {
            return Err(EngineError::config(
                "At least one provider must be listed in provider_priority",
                Some("provider_priority"),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &config.provider_priority {
            if provider.trim().is_empty() {
                return Err(EngineError::config(
                    "Provider names cannot be empty",
                    Some("provider_priority"),
                ));
            }
            if !seen.insert(provider.as_str()) {
                return Err(EngineError::config(
                    format!("Duplicate provider in priority list: {provider}"),
                    Some("provider_priority"),
                ));
            }
        }
        Ok(())
    }

    fn validate_keys(config: &AppConfig) -> Result<()> {
        let mut all_keys = HashSet::new();
        for (provider, keys) in &config.api_keys {
            if !config.provider_priority.contains(provider) {
                warn!(provider = %provider, "API keys configured for a provider outside provider_priority");
            }
            for key in keys {
                let key = key.expose_secret();
                if key.trim().is_empty() {
                    return Err(EngineError::config(
                        format!("Empty API key configured for provider '{provider}'"),
                        Some("api_keys"),
                    ));
                }
                if !all_keys.insert(key.as_str()) {
                    return Err(EngineError::config(
                        format!("Duplicate API key found across providers: {}", preview_key(key)),
                        Some("api_keys"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_base_urls(config: &AppConfig) -> Result<()> {
        for (provider, base_url) in &config.base_urls {
            let url = Url::parse(base_url).map_err(|e| {
                EngineError::config(
                    format!("Invalid base URL for provider '{provider}': {base_url} - {e}"),
                    Some("base_urls"),
                )
            })?;
            match url.scheme() {
                "http" | "https" => {}
                scheme => {
                    return Err(EngineError::config(
                        format!("Unsupported scheme '{scheme}' in base URL for provider '{provider}'"),
                        Some("base_urls"),
                    ))
                }
            }
        }
        Ok(())
    }

    fn validate_bounds(config: &AppConfig) -> Result<()> {
        if config.caching.enabled && config.caching.ttl_seconds == 0 {
            return Err(EngineError::config(
                "Cache TTL must be positive when caching is enabled",
                Some("caching.ttl_seconds"),
            ));
        }
        match config.context_management {
            Some(ContextManagement::SlidingWindow { max_messages: 0 }) => {
                return Err(EngineError::config(
                    "max_messages must be positive",
                    Some("context_management.max_messages"),
                ))
            }
            Some(ContextManagement::TokenLimit { max_tokens: 0 }) => {
                return Err(EngineError::config(
                    "max_tokens must be positive",
                    Some("context_management.max_tokens"),
                ))
            }
            _ => {}
        }
        if config.dispatch.max_attempts == 0 {
            return Err(EngineError::config(
                "dispatch.max_attempts cannot be 0",
                Some("dispatch.max_attempts"),
            ));
        }
        if config.http.connect_timeout_secs == 0 || config.http.request_timeout_secs == 0 {
            return Err(EngineError::config("HTTP timeouts cannot be 0", Some("http")));
        }
        if config.max_tool_iterations == 0 {
            return Err(EngineError::config(
                "max_tool_iterations cannot be 0",
                Some("max_tool_iterations"),
            ));
        }
        Ok(())
    }

    fn validate_tools(config: &AppConfig) -> Result<()> {
        let mut names = HashSet::new();
        for tool in &config.tools {
            if tool.name.trim().is_empty() || tool.description.trim().is_empty() {
                return Err(EngineError::config(
                    "Tool definitions need a name and a description",
                    Some("tools"),
                ));
            }
            if !names.insert(tool.name.as_str()) {
                return Err(EngineError::config(
                    format!("Duplicate tool definition: {}", tool.name),
                    Some("tools"),
                ));
            }
        }
        Ok(())
    }
}
