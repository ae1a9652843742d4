// src/config/app.rs

use crate::message::ToolDefinition;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CachingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: default_cache_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// How history is bounded before it is sent to a provider.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ContextManagement {
    SlidingWindow { max_messages: usize },
    TokenLimit { max_tokens: usize },
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptingConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub core_prompt: Option<String>,
    #[serde(default)]
    pub core_prompt_password: Option<SecretString>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthMode {
    /// Only reactivate rate-limited keys whose cooldown elapsed.
    ReactivateOnly,
    /// Reactivate, then probe and promote one recovered provider per cycle.
    #[default]
    ProbeAndPromote,
}

impl HealthMode {
    pub fn default_interval(self) -> Duration {
        match self {
            Self::ReactivateOnly => Duration::from_secs(60),
            Self::ProbeAndPromote => Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct HealthConfig {
    #[serde(default)]
    pub mode: HealthMode,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub disabled: bool,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        self.interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.mode.default_interval())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub redis_key_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            sessions_dir: default_sessions_dir(),
            metrics_path: None,
            redis_url: None,
            redis_key_prefix: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DispatchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

impl DispatchConfig {
    /// Back-off before retrying after `attempt` (1-based) failed transiently.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms * u64::from(attempt))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Ideal provider trial order. The live order is kept by the key registry.
    #[serde(default)]
    pub provider_priority: Vec<String>,
    /// Default model per provider.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub api_keys: HashMap<String, Vec<SecretString>>,
    /// Endpoint base override per provider.
    #[serde(default)]
    pub base_urls: HashMap<String, String>,
    #[serde(default)]
    pub caching: CachingConfig,
    #[serde(default)]
    pub context_management: Option<ContextManagement>,
    #[serde(default)]
    pub prompting: PromptingConfig,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider_priority: Vec::new(),
            models: HashMap::new(),
            api_keys: HashMap::new(),
            base_urls: HashMap::new(),
            caching: CachingConfig::default(),
            context_management: None,
            prompting: PromptingConfig::default(),
            tools: Vec::new(),
            health: HealthConfig::default(),
            storage: StorageConfig::default(),
            http: HttpConfig::default(),
            dispatch: DispatchConfig::default(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

// Default value functions
fn default_cache_ttl() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/api_state.json")
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("data/sessions")
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

pub(crate) fn default_max_tool_iterations() -> usize {
    5
}

impl AppConfig {
    /// Configured model for `provider`, if any.
    pub fn model_for(&self, provider: &str) -> Option<&str> {
        self.models.get(provider).map(String::as_str)
    }

    pub fn keys_for(&self, provider: &str) -> &[SecretString] {
        self.api_keys.get(provider).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.caching.ttl_seconds)
    }
}
