// src/engine.rs

//! Entry point tying the registry, dispatcher, health loop and orchestrator
//! together.

use crate::cache::InMemoryResponseCache;
use crate::config::{AppConfig, ConfigValidator};
use crate::dispatcher::{Dispatch, FallbackDispatcher};
use crate::error::{EngineError, Result};
use crate::key_manager::KeyRegistry;
use crate::message::{ChatOptions, Message};
use crate::monitoring::HealthMonitor;
use crate::orchestrator::{ChatStream, Orchestrator};
use crate::plugins::{FileMetricsSink, PerformanceTracker, Plugin, PluginPipeline};
use crate::providers::{AdapterRegistry, ProviderAdapter};
use crate::pruning::ContextPruner;
use crate::storage::{
    ApiState, ConversationStore, FileConversationStore, FileKeyStateStore, KeyStateStore,
    ResponseCache,
};
use crate::tokenizer::{default_tokenizer, Tokenizer};
use crate::tools::{Tool, ToolRegistry};
use crate::upstream::Upstream;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Assembles a [`ChatEngine`]. Every collaborator not supplied falls back to
/// the one the configuration describes.
pub struct ChatEngineBuilder {
    config: AppConfig,
    adapters: AdapterRegistry,
    key_store: Option<Arc<dyn KeyStateStore>>,
    conversations: Option<Arc<dyn ConversationStore>>,
    cache: Option<Arc<dyn ResponseCache>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    dispatcher: Option<Arc<dyn Dispatch>>,
    tools: ToolRegistry,
    plugins: PluginPipeline,
}

impl ChatEngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        let adapters = AdapterRegistry::for_config(&config);
        Self {
            config,
            adapters,
            key_store: None,
            conversations: None,
            cache: None,
            tokenizer: None,
            dispatcher: None,
            tools: ToolRegistry::new(),
            plugins: PluginPipeline::new(),
        }
    }

    /// Register or replace the adapter for `provider`.
    pub fn adapter(mut self, provider: impl Into<String>, adapter: impl ProviderAdapter + 'static) -> Self {
        self.adapters.register(provider, adapter);
        self
    }

    pub fn key_store(mut self, store: Arc<dyn KeyStateStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn response_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Replace the fallback dispatcher used for chats. Health probes keep
    /// using the built-in dispatcher.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn tool(mut self, name: impl Into<String>, tool: impl Tool + 'static) -> Self {
        self.tools.register(name, tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    pub fn build(self) -> Result<ChatEngine> {
        let config = self.config;
        ConfigValidator::validate(&config)?;
        ConfigValidator::validate_against_adapters(&config, &self.adapters)?;
        for tool in &config.tools {
            if !self.tools.contains(&tool.name) {
                return Err(EngineError::config(
                    format!("Tool '{}' is declared but has no implementation", tool.name),
                    Some("tools"),
                ));
            }
        }

        let tokenizer = self.tokenizer.unwrap_or_else(default_tokenizer);
        let mut plugins = self.plugins;
        if let Some(path) = &config.storage.metrics_path {
            plugins.register(Arc::new(PerformanceTracker::new(
                Arc::new(FileMetricsSink::new(path)),
                Arc::clone(&tokenizer),
            )));
        }

        let (cache, sweepable) = match self.cache {
            Some(cache) => (Some(cache), None),
            None if config.caching.enabled => default_cache(&config)?,
            None => (None, None),
        };

        let key_store = self
            .key_store
            .unwrap_or_else(|| Arc::new(FileKeyStateStore::new(&config.storage.state_path)));
        let conversations = self
            .conversations
            .unwrap_or_else(|| Arc::new(FileConversationStore::new(&config.storage.sessions_dir)));

        let core_prompt_password = config.prompting.core_prompt_password.clone();
        let config = Arc::new(config);
        let registry = Arc::new(KeyRegistry::new(Arc::clone(&config), key_store));
        let fallback = Arc::new(FallbackDispatcher::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            self.adapters,
            Upstream::new(&config.http)?,
        ));
        let dispatcher: Arc<dyn Dispatch> = match self.dispatcher {
            Some(custom) => custom,
            None => fallback.clone(),
        };
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            fallback,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            dispatcher,
            ContextPruner::new(config.context_management, tokenizer),
            Arc::clone(&conversations),
            cache,
            self.tools,
            plugins,
        ));

        Ok(ChatEngine {
            config,
            registry,
            monitor,
            orchestrator,
            conversations,
            sweepable,
            core_prompt_password,
            background: Mutex::new(Background::default()),
            bootstrapped: AtomicBool::new(false),
        })
    }
}

type DefaultCache = (Option<Arc<dyn ResponseCache>>, Option<InMemoryResponseCache>);

fn default_cache(config: &AppConfig) -> Result<DefaultCache> {
    if let Some(redis) = redis_cache(config)? {
        return Ok((Some(redis), None));
    }
    let memory = InMemoryResponseCache::new();
    Ok((Some(Arc::new(memory.clone())), Some(memory)))
}

#[cfg(feature = "redis")]
fn redis_cache(config: &AppConfig) -> Result<Option<Arc<dyn ResponseCache>>> {
    let Some(url) = &config.storage.redis_url else {
        return Ok(None);
    };
    let cache = crate::storage::RedisResponseCache::connect(url, config.storage.redis_key_prefix.as_deref())?;
    Ok(Some(Arc::new(cache)))
}

#[cfg(not(feature = "redis"))]
fn redis_cache(config: &AppConfig) -> Result<Option<Arc<dyn ResponseCache>>> {
    if config.storage.redis_url.is_some() {
        warn!("redis_url is set but the redis feature is disabled; using the in-memory cache");
    }
    Ok(None)
}

/// Tasks spawned by one bootstrap and the token that stops them.
#[derive(Default)]
struct Background {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct ChatEngine {
    config: Arc<AppConfig>,
    registry: Arc<KeyRegistry>,
    monitor: Arc<HealthMonitor>,
    orchestrator: Arc<Orchestrator>,
    conversations: Arc<dyn ConversationStore>,
    sweepable: Option<InMemoryResponseCache>,
    core_prompt_password: Option<SecretString>,
    background: Mutex<Background>,
    bootstrapped: AtomicBool,
}

impl ChatEngine {
    pub fn builder(config: AppConfig) -> ChatEngineBuilder {
        ChatEngineBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Load key state, start background tasks and run plugin bootstrap hooks.
    /// Calling it again is a no-op.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.registry.initialize().await {
            self.bootstrapped.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let mut background = self.background.lock().await;
        let shutdown = CancellationToken::new();
        background.shutdown = shutdown.clone();
        if self.config.health.disabled {
            info!("Health reclamation loop disabled");
        } else {
            background
                .tasks
                .push(Arc::clone(&self.monitor).spawn(shutdown.clone()));
        }
        if let Some(cache) = &self.sweepable {
            let every = Duration::from_secs(self.config.caching.sweep_interval_secs.max(1));
            background.tasks.push(cache.spawn_sweeper(every, shutdown));
        }
        drop(background);

        self.orchestrator.plugins().bootstrap().await;
        info!(providers = ?self.config.provider_priority, "Chat engine ready");
        Ok(())
    }

    /// Stop background tasks and persist the registry.
    pub async fn shutdown(&self) -> Result<()> {
        let tasks: Vec<_> = {
            let mut background = self.background.lock().await;
            background.shutdown.cancel();
            background.tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.registry.shutdown().await?;
        self.bootstrapped.store(false, Ordering::SeqCst);
        info!("Chat engine stopped");
        Ok(())
    }

    /// Number of background tasks (health loop, cache sweeper) still running.
    pub async fn running_tasks(&self) -> usize {
        self.background
            .lock()
            .await
            .tasks
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Replace the core prompt. Refused when a password is configured and
    /// `password` does not match it.
    pub async fn update_core_prompt(&self, prompt: impl Into<String>, password: Option<&str>) -> bool {
        if let Some(expected) = &self.core_prompt_password {
            if password != Some(expected.expose_secret().as_str()) {
                warn!("Core prompt update rejected: wrong password");
                return false;
            }
        }
        self.orchestrator.set_core_prompt(prompt).await;
        info!("Core prompt updated");
        true
    }

    pub async fn core_prompt(&self) -> String {
        self.orchestrator.core_prompt().await
    }

    pub fn chat_stream(
        &self,
        session_id: impl Into<String>,
        input: impl Into<String>,
        options: ChatOptions,
    ) -> ChatStream {
        Arc::clone(&self.orchestrator).chat_stream(session_id, input, options)
    }

    pub async fn snapshot(&self) -> Result<ApiState> {
        self.registry.snapshot().await
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        self.conversations.history(session_id).await
    }

    pub async fn clear_history(&self, session_id: &str) -> Result<bool> {
        self.conversations.clear_history(session_id).await
    }
}
