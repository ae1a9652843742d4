// src/dispatcher.rs

use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::key_manager::KeyRegistry;
use crate::message::{Message, ToolChoice, ToolDefinition};
use crate::metrics;
use crate::providers::AdapterRegistry;
use crate::upstream::Upstream;
use crate::utils::preview_key;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A reply together with the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub message: Message,
    pub provider: String,
}

/// Produces the next assistant message for a conversation.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
    ) -> Result<Dispatched>;
}

/// Tries providers in the registry's live priority order, rotating keys
/// within a provider and retrying transient failures on the same key.
pub struct FallbackDispatcher {
    config: Arc<AppConfig>,
    registry: Arc<KeyRegistry>,
    adapters: AdapterRegistry,
    upstream: Upstream,
}

enum ProviderOutcome {
    Answered(Message),
    Exhausted(Option<EngineError>),
    /// Not callable as configured. Its rank is left untouched.
    Skipped,
}

impl FallbackDispatcher {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<KeyRegistry>,
        adapters: AdapterRegistry,
        upstream: Upstream,
    ) -> Self {
        Self {
            config,
            registry,
            adapters,
            upstream,
        }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Probe `provider` with `api_key`. Providers without an adapter or
    /// model are never healthy.
    pub async fn probe(&self, provider: &str, api_key: Option<&str>) -> bool {
        let (Some(adapter), Some(model)) = (self.adapters.get(provider), self.config.model_for(provider))
        else {
            return false;
        };
        self.upstream
            .health_check(provider, adapter.as_ref(), api_key, model)
            .await
    }

    /// Whether `provider` needs a key to be called.
    pub fn requires_key(&self, provider: &str) -> bool {
        self.adapters.get(provider).map_or(true, |a| a.requires_key())
    }

    async fn next_untried_provider(&self, tried: &HashSet<String>) -> Result<Option<String>> {
        let priority = self.registry.provider_priority().await?;
        Ok(priority.into_iter().find(|p| !tried.contains(p)))
    }

    async fn try_provider(
        &self,
        provider: &str,
        history: &[Message],
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
        excluded: &mut HashSet<String>,
    ) -> Result<ProviderOutcome> {
        let (Some(adapter), Some(model)) = (self.adapters.get(provider), self.config.model_for(provider))
        else {
            warn!(provider, "Provider has no adapter or model configured, skipping");
            return Ok(ProviderOutcome::Skipped);
        };

        let payload = adapter.build_request_payload(history, model, tools, tool_choice);
        let max_attempts = self.config.dispatch.max_attempts;
        let mut last_error = None;

        loop {
            let api_key = if adapter.requires_key() {
                match self.registry.next_available_key(provider, excluded).await? {
                    Some(key) => Some(key),
                    None => {
                        debug!(provider, "No usable keys left for provider");
                        return Ok(ProviderOutcome::Exhausted(last_error));
                    }
                }
            } else {
                None
            };

            let mut attempt = 1;
            let error = loop {
                match self
                    .upstream
                    .send(provider, adapter.as_ref(), api_key.as_deref(), model, &payload)
                    .await
                {
                    Ok(message) => return Ok(ProviderOutcome::Answered(message)),
                    Err(e) if e.is_transient() && attempt < max_attempts => {
                        let delay = self.config.dispatch.retry_delay(attempt);
                        warn!(provider, attempt, ?delay, error = %e, "Transient provider failure, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => break e,
                }
            };

            match (error.key_status(), api_key) {
                (Some(status), Some(key)) => {
                    warn!(
                        provider,
                        api_key.preview = %preview_key(&key),
                        error = %error,
                        "Key failed, rotating"
                    );
                    self.registry.update_key_status(&key, status).await?;
                    excluded.insert(key);
                    last_error = Some(error);
                }
                _ => {
                    warn!(provider, error = %error, "Provider failed");
                    return Ok(ProviderOutcome::Exhausted(Some(error)));
                }
            }
        }
    }
}

#[async_trait]
impl Dispatch for FallbackDispatcher {
    #[instrument(skip_all, fields(history_len = history.len(), tools = tools.len()))]
    async fn dispatch(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
    ) -> Result<Dispatched> {
        let mut tried = HashSet::new();
        let mut excluded = HashSet::new();
        let mut last_error = None;

        while let Some(provider) = self.next_untried_provider(&tried).await? {
            tried.insert(provider.clone());

            match self
                .try_provider(&provider, history, tools, tool_choice, &mut excluded)
                .await?
            {
                ProviderOutcome::Answered(message) => {
                    self.registry.set_highest_priority(&provider).await?;
                    metrics::record_dispatch(&provider, true);
                    info!(provider = %provider, tool_calls = message.requested_tool_calls().len(), "Provider answered");
                    return Ok(Dispatched { message, provider });
                }
                ProviderOutcome::Exhausted(error) => {
                    metrics::record_dispatch(&provider, false);
                    if error.is_some() {
                        last_error = error;
                    }
                    self.registry.demote_provider(&provider).await?;
                }
                ProviderOutcome::Skipped => {}
            }
        }

        warn!(providers_tried = tried.len(), "All providers failed");
        Err(EngineError::AllProvidersFailed {
            last: last_error.map(Box::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::error::ErrorKind;
    use crate::storage::{InMemoryKeyStateStore, KeyStatus};
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        }))
    }

    async fn dispatcher(server: &MockServer, keys: &[(&str, &[&str])]) -> FallbackDispatcher {
        let mut config = AppConfig {
            provider_priority: keys.iter().map(|(p, _)| p.to_string()).collect(),
            ..AppConfig::default()
        };
        config.dispatch.retry_base_delay_ms = 1;
        for (provider, provider_keys) in keys {
            config.models.insert(provider.to_string(), "m".into());
            config.base_urls.insert(provider.to_string(), server.uri());
            config.api_keys.insert(
                provider.to_string(),
                provider_keys.iter().map(|k| SecretString::new(k.to_string())).collect(),
            );
        }
        let config = Arc::new(config);
        let registry = Arc::new(KeyRegistry::new(
            Arc::clone(&config),
            Arc::new(InMemoryKeyStateStore::new()),
        ));
        registry.initialize().await.unwrap();
        let adapters = AdapterRegistry::for_config(&config);
        FallbackDispatcher::new(config, registry, adapters, Upstream::new(&HttpConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn rotates_to_next_key_after_invalid_key() {
        let server = MockServer::start().await;
        Mock::given(header("authorization", "Bearer sk-bad"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(header("authorization", "Bearer sk-good"))
            .respond_with(reply("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, &[("openai", &["sk-bad", "sk-good"])]).await;
        let result = dispatcher
            .dispatch(&[Message::user("hi")], &[], &ToolChoice::Auto)
            .await
            .unwrap();
        assert_eq!(result.provider, "openai");
        assert_eq!(result.message.content, "ok");

        let state = dispatcher.registry().snapshot().await.unwrap();
        assert_eq!(state.keys("openai")[0].status, KeyStatus::Invalid);
        assert_eq!(state.keys("openai")[1].status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn transient_failures_retry_same_key_up_to_the_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, &[("openai", &["sk-1"])]).await;
        let err = dispatcher
            .dispatch(&[Message::user("hi")], &[], &ToolChoice::Auto)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllProvidersFailed);
        assert_eq!(err.last_cause().map(|e| e.kind()), Some(ErrorKind::ServiceUnavailable));

        let state = dispatcher.registry().snapshot().await.unwrap();
        assert_eq!(state.keys("openai")[0].status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn transient_failure_then_success_keeps_the_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(reply("second time"))
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, &[("openai", &["sk-1"])]).await;
        let result = dispatcher
            .dispatch(&[Message::user("hi")], &[], &ToolChoice::Auto)
            .await
            .unwrap();
        assert_eq!(result.message.content, "second time");
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_cause_and_demotes_everyone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, &[("groq", &["gsk-1"]), ("openai", &["sk-1"])]).await;
        let err = dispatcher
            .dispatch(&[Message::user("hi")], &[], &ToolChoice::Auto)
            .await
            .unwrap_err();
        assert_eq!(err.last_cause().map(|e| e.kind()), Some(ErrorKind::RateLimit));

        let state = dispatcher.registry().snapshot().await.unwrap();
        assert!(state.keys("groq")[0].cooldown_until.is_some());
        assert_eq!(state.keys("openai")[0].status, KeyStatus::RateLimited);
        assert_eq!(state.provider_priority, vec!["groq", "openai"]);

        // No active keys remain, so the next call fails without any request.
        let err = dispatcher
            .dispatch(&[Message::user("hi")], &[], &ToolChoice::Auto)
            .await
            .unwrap_err();
        assert!(err.last_cause().is_none());
    }
}
