// src/orchestrator.rs

//! Per-request chat state machine.
//!
//! A chat checks the response cache, then loops over dispatch and tool
//! execution until the provider answers in plain text, and finally streams
//! that text back word by word. The loop is bounded by
//! `max_tool_iterations`.

use crate::cache::cache_key;
use crate::config::AppConfig;
use crate::dispatcher::Dispatch;
use crate::error::{EngineError, Result};
use crate::message::{ChatOptions, Message, ToolCall, ToolChoice};
use crate::metrics;
use crate::plugins::{ChatCompletion, ChatContext, PluginPipeline};
use crate::pruning::ContextPruner;
use crate::storage::{ConversationStore, ResponseCache};
use crate::tools::{ToolOutcome, ToolRegistry};
use async_stream::{stream, try_stream};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

pub const DEFAULT_CORE_PROMPT: &str = "You are a helpful AI assistant.";

/// What a caller observes while a chat runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A piece of the final answer. Concatenated chunks equal the answer.
    Chunk(String),
    /// Tool calls the provider requested, before they run.
    ToolCall(Vec<ToolCall>),
    /// Results of the preceding tool calls, in call order.
    ToolResult(Vec<ToolOutcome>),
    /// The whole answer, served from the response cache.
    CachedResponse(String),
}

pub type ChatStream = BoxStream<'static, Result<ChatEvent>>;

enum Step {
    Emit(ChatEvent),
    Answered { provider: String },
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    dispatcher: Arc<dyn Dispatch>,
    pruner: ContextPruner,
    conversations: Arc<dyn ConversationStore>,
    cache: Option<Arc<dyn ResponseCache>>,
    tools: ToolRegistry,
    plugins: PluginPipeline,
    core_prompt: RwLock<String>,
}

impl Orchestrator {
    /// `cache` is only consulted when caching is enabled in `config`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        dispatcher: Arc<dyn Dispatch>,
        pruner: ContextPruner,
        conversations: Arc<dyn ConversationStore>,
        cache: Option<Arc<dyn ResponseCache>>,
        tools: ToolRegistry,
        plugins: PluginPipeline,
    ) -> Self {
        let core_prompt = config
            .prompting
            .core_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_CORE_PROMPT.to_string());
        let cache = cache.filter(|_| config.caching.enabled);
        Self {
            config,
            dispatcher,
            pruner,
            conversations,
            cache,
            tools,
            plugins,
            core_prompt: RwLock::new(core_prompt),
        }
    }

    pub fn plugins(&self) -> &PluginPipeline {
        &self.plugins
    }

    pub async fn core_prompt(&self) -> String {
        self.core_prompt.read().await.clone()
    }

    pub async fn set_core_prompt(&self, prompt: impl Into<String>) {
        *self.core_prompt.write().await = prompt.into();
    }

    /// Core prompt followed by the per-call override or the configured
    /// default. The core part is always present.
    pub async fn effective_system_prompt(&self, options: &ChatOptions) -> String {
        let core = self.core_prompt.read().await.clone();
        let extra = options
            .system_prompt
            .as_deref()
            .or(self.config.prompting.system_prompt.as_deref())
            .unwrap_or_default();
        format!("{core}\n\n{extra}").trim().to_string()
    }

    /// Run one chat turn. The stream ends after the final answer, or with a
    /// single error when every provider failed or the tool budget ran out.
    pub fn chat_stream(
        self: Arc<Self>,
        session_id: impl Into<String>,
        input: impl Into<String>,
        options: ChatOptions,
    ) -> ChatStream {
        let ctx = ChatContext {
            request_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            user_input: input.into(),
            started_at: Instant::now(),
        };
        let span = info_span!("chat", request_id = %ctx.request_id, session_id = %ctx.session_id);

        let events = stream! {
            self.plugins.pre_chat(&ctx).await;

            let mut steps = Box::pin(Arc::clone(&self).run(ctx.clone(), options));
            let mut provider = None;
            let mut response = String::new();
            let mut cached = false;
            let mut failure = None;

            while let Some(step) = steps.next().await {
                match step {
                    Ok(Step::Answered { provider: p }) => provider = Some(p),
                    Ok(Step::Emit(event)) => {
                        match &event {
                            ChatEvent::Chunk(text) => response.push_str(text),
                            ChatEvent::CachedResponse(text) => {
                                cached = true;
                                response.push_str(text);
                            }
                            ChatEvent::ToolCall(_) | ChatEvent::ToolResult(_) => {}
                        }
                        yield Ok(event);
                    }
                    Err(e) => {
                        failure = Some(e.at_chat_boundary());
                        break;
                    }
                }
            }
            drop(steps);

            let completion = ChatCompletion {
                provider,
                response: failure.is_none().then_some(response),
                cached,
                error: failure.as_ref().map(|e| (e.kind(), e.to_string())),
            };
            metrics::record_chat_duration(ctx.started_at.elapsed(), failure.is_none());
            self.plugins.chat_complete(&ctx, &completion).await;

            if let Some(e) = failure {
                e.log(Some(&ctx.request_id));
                yield Err(e);
            } else {
                info!(
                    cached,
                    provider = completion.provider.as_deref().unwrap_or("cache"),
                    elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
                    "Chat completed"
                );
            }
        };

        Box::pin(InSpan {
            inner: Box::pin(events),
            span,
        })
    }

    fn run(
        self: Arc<Self>,
        ctx: ChatContext,
        options: ChatOptions,
    ) -> impl Stream<Item = Result<Step>> + Send + 'static {
        try_stream! {
            let stored = self.conversations.history(&ctx.session_id).await?;
            let user_message = Message::user(&ctx.user_input);

            let cache_key = match &self.cache {
                Some(_) => Some(cache_key(self.pruner.prune(&stored), &user_message)?),
                None => None,
            };
            if let Some(hit) = self.cache_lookup(cache_key.as_deref()).await {
                info!("Serving cached response");
                yield Step::Emit(ChatEvent::CachedResponse(hit));
                return;
            }

            let limit = self.config.max_tool_iterations;
            let tool_choice = options.tool_choice.clone().unwrap_or(ToolChoice::Auto);
            let mut working = stored;
            working.push(user_message.clone());

            let mut answer = None;
            for iteration in 1..=limit {
                let system = self.effective_system_prompt(&options).await;
                let mut request = Vec::with_capacity(working.len() + 1);
                if !system.is_empty() {
                    request.push(Message::system(system));
                }
                request.extend_from_slice(self.pruner.prune(&working));
                self.plugins.pre_request(&ctx, &request).await;

                let dispatched = self
                    .dispatcher
                    .dispatch(&request, &self.config.tools, &tool_choice)
                    .await?;
                yield Step::Answered { provider: dispatched.provider.clone() };

                if !dispatched.message.has_tool_calls() {
                    answer = Some(dispatched.message);
                    break;
                }

                let calls = dispatched.message.requested_tool_calls().to_vec();
                debug!(iteration, calls = calls.len(), provider = %dispatched.provider, "Provider requested tools");
                yield Step::Emit(ChatEvent::ToolCall(calls.clone()));
                self.plugins.tool_call(&ctx, &calls).await;

                let outcomes = self.tools.execute_all(&calls).await;
                yield Step::Emit(ChatEvent::ToolResult(outcomes.clone()));
                self.plugins.tool_result(&ctx, &outcomes).await;

                working.push(dispatched.message);
                working.extend(outcomes.iter().map(ToolOutcome::to_message));
            }

            let Some(answer) = answer else {
                warn!(limit, "Tool-call budget exhausted without a final answer");
                Err::<(), _>(EngineError::ToolBudgetExceeded { limit })?;
                return;
            };

            let mut full = String::with_capacity(answer.content.len());
            for chunk in word_chunks(&answer.content) {
                full.push_str(&chunk);
                self.plugins.response_chunk(&ctx, &chunk).await;
                yield Step::Emit(ChatEvent::Chunk(chunk));
            }

            if !full.trim().is_empty() {
                self.conversations.add_message(&ctx.session_id, &user_message).await?;
                self.conversations
                    .add_message(&ctx.session_id, &Message::assistant(full.clone()))
                    .await?;
                self.cache_store(cache_key.as_deref(), &full).await;
            }
        }
    }

    async fn cache_lookup(&self, key: Option<&str>) -> Option<String> {
        let (cache, key) = self.cache.as_ref().zip(key)?;
        match cache.get(key).await {
            Ok(hit) => {
                metrics::record_cache_lookup(hit.is_some());
                if hit.is_none() {
                    debug!("Cache miss");
                }
                hit
            }
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, continuing without cache");
                None
            }
        }
    }

    async fn cache_store(&self, key: Option<&str>, value: &str) {
        let Some((cache, key)) = self.cache.as_ref().zip(key) else {
            return;
        };
        if let Err(e) = cache.set(key, value, self.config.cache_ttl()).await {
            warn!(error = %e, "Failed to cache response");
        }
    }
}

/// Splits an answer at spaces, keeping the separator on every piece but the
/// last, so the pieces concatenate back to the original text.
pub fn word_chunks(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let words: Vec<&str> = text.split(' ').collect();
    let last = words.len() - 1;
    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| if i == last { word.to_string() } else { format!("{word} ") })
        .collect()
}

/// Enters `span` on every poll of the wrapped stream. `tracing::Instrument`
/// only wraps futures, and the chat is a stream.
struct InSpan {
    inner: ChatStream,
    span: Span,
}

impl Stream for InSpan {
    type Item = Result<ChatEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let _entered = this.span.enter();
        this.inner.as_mut().poll_next(cx)
    }
}
