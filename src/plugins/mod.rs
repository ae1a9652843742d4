// src/plugins/mod.rs

//! Lifecycle hooks around a chat.
//!
//! Plugins run in registration order. A failing hook is logged and skipped;
//! it never aborts the chat or prevents later plugins from running.

pub mod performance;

use crate::error::ErrorKind;
use crate::message::{Message, ToolCall};
use crate::tools::ToolOutcome;
use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

pub use performance::{FileMetricsSink, MetricsSink, PerformanceRecord, PerformanceTracker};

pub type PluginError = Box<dyn Error + Send + Sync>;
pub type HookResult = Result<(), PluginError>;

/// Identity of the chat a hook is called for.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub request_id: String,
    pub session_id: String,
    pub user_input: String,
    pub started_at: Instant,
}

/// How a chat ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub provider: Option<String>,
    pub response: Option<String>,
    pub cached: bool,
    pub error: Option<(ErrorKind, String)>,
}

impl ChatCompletion {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn on_bootstrap(&self) -> HookResult {
        Ok(())
    }

    async fn on_pre_chat(&self, ctx: &ChatContext) -> HookResult {
        Ok(())
    }

    /// Called before every dispatch with the pruned history being sent.
    async fn on_pre_request(&self, ctx: &ChatContext, history: &[Message]) -> HookResult {
        Ok(())
    }

    async fn on_tool_call(&self, ctx: &ChatContext, calls: &[ToolCall]) -> HookResult {
        Ok(())
    }

    async fn on_tool_result(&self, ctx: &ChatContext, outcomes: &[ToolOutcome]) -> HookResult {
        Ok(())
    }

    async fn on_response_chunk(&self, ctx: &ChatContext, chunk: &str) -> HookResult {
        Ok(())
    }

    /// Called once per chat, on success and on failure.
    async fn on_chat_complete(&self, ctx: &ChatContext, completion: &ChatCompletion) -> HookResult {
        Ok(())
    }
}

/// Registered plugins, invoked best-effort in order.
#[derive(Clone, Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

fn report(plugin: &Arc<dyn Plugin>, hook: &'static str, result: HookResult) {
    if let Err(e) = result {
        warn!(plugin = plugin.name(), hook, error = %e, "Plugin hook failed");
    }
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn bootstrap(&self) {
        for plugin in &self.plugins {
            report(plugin, "on_bootstrap", plugin.on_bootstrap().await);
        }
    }

    pub async fn pre_chat(&self, ctx: &ChatContext) {
        for plugin in &self.plugins {
            report(plugin, "on_pre_chat", plugin.on_pre_chat(ctx).await);
        }
    }

    pub async fn pre_request(&self, ctx: &ChatContext, history: &[Message]) {
        for plugin in &self.plugins {
            report(plugin, "on_pre_request", plugin.on_pre_request(ctx, history).await);
        }
    }

    pub async fn tool_call(&self, ctx: &ChatContext, calls: &[ToolCall]) {
        for plugin in &self.plugins {
            report(plugin, "on_tool_call", plugin.on_tool_call(ctx, calls).await);
        }
    }

    pub async fn tool_result(&self, ctx: &ChatContext, outcomes: &[ToolOutcome]) {
        for plugin in &self.plugins {
            report(plugin, "on_tool_result", plugin.on_tool_result(ctx, outcomes).await);
        }
    }

    pub async fn response_chunk(&self, ctx: &ChatContext, chunk: &str) {
        for plugin in &self.plugins {
            report(plugin, "on_response_chunk", plugin.on_response_chunk(ctx, chunk).await);
        }
    }

    pub async fn chat_complete(&self, ctx: &ChatContext, completion: &ChatCompletion) {
        for plugin in &self.plugins {
            report(plugin, "on_chat_complete", plugin.on_chat_complete(ctx, completion).await);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_pre_chat(&self, _ctx: &ChatContext) -> HookResult {
            self.log.lock().unwrap().push(self.name.to_string());
            if self.fail {
                return Err("boom".into());
            }
            Ok(())
        }
    }

    fn ctx() -> ChatContext {
        ChatContext {
            request_id: "r".into(),
            session_id: "s".into(),
            user_input: "hi".into(),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn failing_hook_does_not_stop_later_plugins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = PluginPipeline::new();
        for (name, fail) in [("first", true), ("second", false)] {
            pipeline.register(Arc::new(Recorder {
                name,
                fail,
                log: Arc::clone(&log),
            }));
        }

        pipeline.pre_chat(&ctx()).await;
        pipeline.chat_complete(&ctx(), &ChatCompletion {
            provider: None,
            response: None,
            cached: false,
            error: None,
        })
        .await;
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }
}
