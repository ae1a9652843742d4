// src/providers/openai_compat.rs

use crate::message::{Message, Role, ToolChoice, ToolDefinition};
use crate::providers::ProviderAdapter;
use reqwest::RequestBuilder;
use serde_json::{json, Value};

/// Public API bases of the OpenAI-compatible built-ins.
pub const BUILTIN_ENDPOINTS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("perplexity", "https://api.perplexity.ai"),
];

/// Chat-completions style provider with bearer authentication.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    base_url: String,
    requires_key: bool,
}

impl OpenAiCompatAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            requires_key: true,
        }
    }

    /// Dispatch without a credential, e.g. for a local gateway.
    pub fn keyless(mut self) -> Self {
        self.requires_key = false;
        self
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn requires_key(&self) -> bool {
        self.requires_key
    }

    fn resolve_endpoint(&self, _model: &str) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request_payload(
        &self,
        history: &[Message],
        model: &str,
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
    ) -> Value {
        let mut payload = json!({
            "model": model,
            "messages": history,
        });
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            payload["tools"] = Value::Array(tools);
            payload["tool_choice"] = tool_choice.to_value();
        }
        payload
    }

    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.bearer_auth(api_key)
    }

    fn extract_reply(&self, raw: &Value) -> Option<Message> {
        let message = raw.pointer("/choices/0/message")?;
        let mut reply: Message = serde_json::from_value(message.clone()).ok()?;
        reply.role = Role::Assistant;
        if reply.content.is_empty() && !reply.has_tool_calls() {
            return None;
        }
        Some(reply)
    }
}
