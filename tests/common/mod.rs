//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chat_relay::dispatcher::{Dispatch, Dispatched};
use chat_relay::message::{Message, ToolChoice, ToolDefinition};
use chat_relay::{AppConfig, Result};
use secrecy::SecretString;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use wiremock::ResponseTemplate;

/// Test configuration builder
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.dispatch.retry_base_delay_ms = 1;
        config.health.disabled = true;
        Self { config }
    }

    /// Append `provider` to the priority list with model `m` and `keys`.
    pub fn provider(mut self, provider: &str, keys: &[&str]) -> Self {
        self.config.provider_priority.push(provider.to_string());
        self.config.models.insert(provider.to_string(), "m".to_string());
        self.config.api_keys.insert(
            provider.to_string(),
            keys.iter().map(|k| SecretString::new(k.to_string())).collect(),
        );
        self
    }

    pub fn base_url(mut self, provider: &str, url: impl Into<String>) -> Self {
        self.config.base_urls.insert(provider.to_string(), url.into());
        self
    }

    pub fn caching(mut self, ttl_seconds: u64) -> Self {
        self.config.caching.enabled = true;
        self.config.caching.ttl_seconds = ttl_seconds;
        self
    }

    pub fn tool(mut self, name: &str) -> Self {
        self.config.tools.push(ToolDefinition {
            name: name.to_string(),
            description: format!("{name} tool"),
            parameters: json!({"type": "object", "properties": {}}),
        });
        self
    }

    pub fn with(mut self, f: impl FnOnce(&mut AppConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// OpenAI-style chat completion carrying plain text.
pub fn openai_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": text}}]
    }))
}

/// OpenAI-style error body.
pub fn openai_error(status: u16, kind: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "error": {"message": kind, "type": kind, "code": kind}
    }))
}

/// A dispatcher that replays scripted replies and records every history it
/// was handed.
pub struct ScriptedDispatcher {
    replies: Mutex<VecDeque<Message>>,
    repeat: Option<Message>,
    pub seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedDispatcher {
    pub fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `reply`.
    pub fn always(reply: Message) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: Some(reply),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatch for ScriptedDispatcher {
    async fn dispatch(
        &self,
        history: &[Message],
        _tools: &[ToolDefinition],
        _tool_choice: &ToolChoice,
    ) -> Result<Dispatched> {
        self.seen.lock().unwrap().push(history.to_vec());
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .expect("scripted dispatcher ran out of replies");
        Ok(Dispatched {
            message,
            provider: "scripted".to_string(),
        })
    }
}
