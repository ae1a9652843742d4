// src/providers/gemini.rs

use crate::message::{Message, Role, ToolCall, ToolChoice, ToolDefinition};
use crate::providers::{parse_arguments, ProviderAdapter};
use reqwest::RequestBuilder;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google `generateContent` API. The key travels in the `x-goog-api-key` header, system
/// messages are folded into `systemInstruction` and the assistant speaks as
/// `model`.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

fn content_for(message: &Message) -> Value {
    match message.role {
        Role::Tool => {
            let response = serde_json::from_str::<Value>(&message.content)
                .unwrap_or_else(|_| json!({ "content": message.content }));
            json!({
                "role": "user",
                "parts": [{
                    "functionResponse": {
                        "name": message.name.clone().unwrap_or_default(),
                        "response": response,
                    }
                }]
            })
        }
        Role::Assistant if message.has_tool_calls() => {
            let parts: Vec<Value> = message
                .requested_tool_calls()
                .iter()
                .map(|call| {
                    json!({
                        "functionCall": {
                            "name": call.function.name,
                            "args": parse_arguments(&call.function.arguments),
                        }
                    })
                })
                .collect();
            json!({ "role": "model", "parts": parts })
        }
        Role::Assistant => json!({ "role": "model", "parts": [{ "text": message.content }] }),
        Role::User | Role::System => {
            json!({ "role": "user", "parts": [{ "text": message.content }] })
        }
    }
}

fn tool_config(choice: &ToolChoice) -> Value {
    let config = match choice {
        ToolChoice::Auto => json!({ "mode": "AUTO" }),
        ToolChoice::None => json!({ "mode": "NONE" }),
        ToolChoice::Function(name) => json!({ "mode": "ANY", "allowedFunctionNames": [name] }),
    };
    json!({ "functionCallingConfig": config })
}

impl ProviderAdapter for GeminiAdapter {
    fn resolve_endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    fn build_request_payload(
        &self,
        history: &[Message],
        _model: &str,
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
    ) -> Value {
        let system: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<Value> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(content_for)
            .collect();

        let mut payload = json!({ "contents": contents });
        if !system.is_empty() {
            payload["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            payload["tools"] = json!([{ "functionDeclarations": declarations }]);
            payload["toolConfig"] = tool_config(tool_choice);
        }
        payload
    }

    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.header("x-goog-api-key", api_key)
    }

    fn extract_reply(&self, raw: &Value) -> Option<Message> {
        let parts = raw.pointer("/candidates/0/content/parts")?.as_array()?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        let calls: Vec<ToolCall> = parts
            .iter()
            .filter_map(|p| p.get("functionCall"))
            .enumerate()
            .filter_map(|(index, call)| {
                let name = call.get("name")?.as_str()?;
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                Some(ToolCall::function(format!("call_{index}"), name, args.to_string()))
            })
            .collect();

        if !calls.is_empty() {
            let mut reply = Message::assistant_tool_calls(calls);
            reply.content = text;
            return Some(reply);
        }
        if text.is_empty() {
            return None;
        }
        Some(Message::assistant(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_system_prompt_and_maps_roles() {
        let history = vec![
            Message::system("core"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let payload =
            GeminiAdapter::default().build_request_payload(&history, "gemini-pro", &[], &ToolChoice::Auto);
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "core");
        assert_eq!(payload["contents"].as_array().unwrap().len(), 2);
        assert_eq!(payload["contents"][1]["role"], "model");
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn tool_round_trip_uses_function_parts() {
        let call = ToolCall::function("call_0", "get_time", r#"{"tz":"UTC"}"#);
        let history = vec![
            Message::user("time?"),
            Message::assistant_tool_calls(vec![call]),
            Message::tool_result("call_0", "get_time", r#"{"time":"12:00"}"#),
        ];
        let tool = ToolDefinition {
            name: "get_time".into(),
            description: "Current time".into(),
            parameters: json!({"type": "object"}),
        };
        let payload = GeminiAdapter::default().build_request_payload(
            &history,
            "gemini-pro",
            &[tool],
            &ToolChoice::Function("get_time".into()),
        );
        assert_eq!(payload["contents"][1]["parts"][0]["functionCall"]["args"]["tz"], "UTC");
        assert_eq!(
            payload["contents"][2]["parts"][0]["functionResponse"]["response"]["time"],
            "12:00"
        );
        assert_eq!(payload["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
    }

    #[test]
    fn extracts_text_and_function_calls() {
        let adapter = GeminiAdapter::default();
        let text = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hi"}, {"text": " there"}]}}]});
        assert_eq!(adapter.extract_reply(&text), Some(Message::assistant("Hi there")));

        let call = json!({"candidates": [{"content": {"parts": [
            {"functionCall": {"name": "get_time", "args": {"tz": "UTC"}}}
        ]}}]});
        let reply = adapter.extract_reply(&call).unwrap();
        assert_eq!(reply.requested_tool_calls()[0].function.name, "get_time");
        assert_eq!(reply.requested_tool_calls()[0].id, "call_0");

        assert_eq!(adapter.extract_reply(&json!({"candidates": []})), None);
    }

    #[test]
    fn key_travels_in_header_not_url() {
        let adapter = GeminiAdapter::default();
        let request = adapter
            .authorize(
                reqwest::Client::new().post(adapter.resolve_endpoint("gemini-pro")),
                "AIza-secret",
            )
            .build()
            .unwrap();
        assert_eq!(request.headers()["x-goog-api-key"], "AIza-secret");
        assert!(!request.url().as_str().contains("AIza-secret"));
        assert!(request.url().query().is_none());
    }
}
