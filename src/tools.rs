// src/tools.rs

use crate::message::{Message, ToolCall};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

pub type ToolError = Box<dyn Error + Send + Sync>;

/// A caller-supplied function the provider may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a [`Tool`].
pub struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.0)(arguments).await
    }
}

/// Result of one executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub result: Value,
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }

    /// The `tool` message fed back to the provider.
    pub fn to_message(&self) -> Message {
        let content = match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Message::tool_result(&self.call_id, &self.name, content)
    }
}

/// Tool implementations by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, tool: impl Tool + 'static) {
        self.tools.insert(name.into(), Arc::new(tool));
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.register(name, FnTool(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call. Unknown tools, malformed arguments and tool failures
    /// become `{"error": ...}` results; nothing here fails the batch.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let name = &call.function.name;
        let result = match self.tools.get(name) {
            None => {
                warn!(tool = %name, "Provider requested an unknown tool");
                json!({ "error": format!("Unknown tool: {name}") })
            }
            Some(tool) => match parse_arguments(&call.function.arguments) {
                Err(e) => {
                    warn!(tool = %name, error = %e, "Malformed tool arguments");
                    json!({ "error": format!("Invalid arguments for {name}: {e}") })
                }
                Ok(arguments) => match tool.call(arguments).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Tool failed");
                        json!({ "error": e.to_string() })
                    }
                },
            },
        };
        debug!(tool = %name, call_id = %call.id, "Tool executed");
        ToolOutcome {
            call_id: call.id.clone(),
            name: name.clone(),
            result,
        }
    }

    /// Run calls one after another in the order given.
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            outcomes.push(self.execute(call).await);
        }
        outcomes
    }
}

fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_fn("add", |args: Value| async move {
            let a = args["a"].as_i64().ok_or("missing a")?;
            let b = args["b"].as_i64().ok_or("missing b")?;
            Ok::<_, ToolError>(json!(a + b))
        });
        registry.register_fn("echo", |args: Value| async move { Ok::<_, ToolError>(args["text"].clone()) });
        registry
    }

    #[tokio::test]
    async fn executes_and_serialises_results() {
        let outcome = registry()
            .execute(&ToolCall::function("c1", "add", r#"{"a":2,"b":3}"#))
            .await;
        assert_eq!(outcome.result, json!(5));
        assert!(!outcome.is_error());
        assert_eq!(outcome.to_message(), Message::tool_result("c1", "add", "5"));

        let echo = registry()
            .execute(&ToolCall::function("c2", "echo", r#"{"text":"hi"}"#))
            .await;
        assert_eq!(echo.to_message().content, "hi");
    }

    #[tokio::test]
    async fn failures_become_error_results() {
        let registry = registry();
        let unknown = registry.execute(&ToolCall::function("c1", "nope", "{}")).await;
        assert_eq!(unknown.result, json!({"error": "Unknown tool: nope"}));

        let malformed = registry.execute(&ToolCall::function("c2", "add", "{oops")).await;
        assert!(malformed.is_error());

        let failed = registry.execute(&ToolCall::function("c3", "add", r#"{"a":1}"#)).await;
        assert_eq!(failed.result, json!({"error": "missing b"}));
        assert_eq!(failed.to_message().content, r#"{"error":"missing b"}"#);
    }

    #[tokio::test]
    async fn batch_runs_sequentially_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        let seen = Arc::clone(&order);
        registry.register_fn("record", move |args: Value| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(args["n"].as_i64().unwrap_or_default());
                Ok::<_, ToolError>(Value::Null)
            }
        });

        let calls: Vec<ToolCall> = (0..4)
            .map(|n| ToolCall::function(format!("c{n}"), "record", format!(r#"{{"n":{n}}}"#)))
            .collect();
        let outcomes = registry.execute_all(&calls).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        let ids: Vec<&str> = outcomes.iter().map(|o| o.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3"]);
    }
}
