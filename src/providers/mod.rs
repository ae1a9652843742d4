// src/providers/mod.rs

//! Provider request/response shaping.
//!
//! Each provider is served by a [`ProviderAdapter`]: it resolves the endpoint
//! for a model, shapes the request body from the conversation, attaches the
//! credential and extracts the assistant reply. The transport itself lives in
//! [`crate::upstream`].

pub mod gemini;
pub mod openai_compat;

use crate::config::AppConfig;
use crate::message::{Message, ToolChoice, ToolDefinition};
use reqwest::RequestBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub use gemini::GeminiAdapter;
pub use openai_compat::OpenAiCompatAdapter;

pub trait ProviderAdapter: Send + Sync {
    /// Whether calls need an API key. Keyless adapters are dispatched without one.
    fn requires_key(&self) -> bool {
        true
    }

    fn resolve_endpoint(&self, model: &str) -> String;

    fn build_request_payload(
        &self,
        history: &[Message],
        model: &str,
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
    ) -> Value;

    /// Attach the credential to an outgoing request.
    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder;

    /// The assistant reply, or `None` when the response has neither content
    /// nor tool calls.
    fn extract_reply(&self, raw: &Value) -> Option<Message>;

    /// Smallest request that proves the provider answers with this key.
    fn probe_payload(&self, model: &str) -> Value {
        self.build_request_payload(&[Message::user("ping")], model, &[], &ToolChoice::None)
    }
}

/// Adapters by provider name, assembled once at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `openai`, `groq`, `perplexity` and `gemini` at their public endpoints.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, base) in openai_compat::BUILTIN_ENDPOINTS {
            registry.register(*name, OpenAiCompatAdapter::new(*base));
        }
        registry.register("gemini", GeminiAdapter::new(gemini::DEFAULT_BASE_URL));
        registry
    }

    /// Built-ins with `base_urls` overrides applied. A base URL for a provider
    /// without a built-in adapter registers an OpenAI-compatible one, keyless
    /// when no keys are configured for it.
    pub fn for_config(config: &AppConfig) -> Self {
        let mut registry = Self::with_builtins();
        for (provider, base_url) in &config.base_urls {
            if provider == "gemini" {
                registry.register(provider.clone(), GeminiAdapter::new(base_url));
                continue;
            }
            let mut adapter = OpenAiCompatAdapter::new(base_url);
            if !registry.contains(provider) && config.keys_for(provider).is_empty() {
                adapter = adapter.keyless();
            }
            debug!(provider = %provider, base_url = %base_url, "Using endpoint override");
            registry.register(provider.clone(), adapter);
        }
        registry
    }

    /// Register or replace the adapter for `name`.
    pub fn register(&mut self, name: impl Into<String>, adapter: impl ProviderAdapter + 'static) {
        self.adapters.insert(name.into(), Arc::new(adapter));
    }

    pub fn register_arc(&mut self, name: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }
}

/// Parse provider-supplied tool arguments, falling back to an empty object.
pub(crate) fn parse_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::Object(Default::default()))
}
