//! Error handling for the dispatch engine
//!
//! Provider failures are classified once, at the upstream boundary, into the
//! variants below. The dispatcher consumes the classification to drive key
//! status transitions; only total exhaustion and tool-budget overruns reach
//! the caller of a chat.

pub mod types;

use crate::storage::KeyStatus;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Tagged kind of an [`EngineError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Adapter,
    InvalidApiKey,
    InsufficientQuota,
    RateLimit,
    ServiceUnavailable,
    ContentExtraction,
    AllProvidersFailed,
    ToolBudgetExceeded,
    NotInitialized,
    Serialization,
    Io,
    Http,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Adapter => "adapter",
            Self::InvalidApiKey => "invalid_api_key",
            Self::InsufficientQuota => "insufficient_quota",
            Self::RateLimit => "rate_limit",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ContentExtraction => "content_extraction",
            Self::AllProvidersFailed => "all_providers_failed",
            Self::ToolBudgetExceeded => "tool_budget_exceeded",
            Self::NotInitialized => "not_initialized",
            Self::Serialization => "serialization",
            Self::Io => "io",
            Self::Http => "http",
            Self::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type of the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    Config { message: String, field: Option<String> },

    // Persistence errors
    #[error("Storage adapter failed: {message}")]
    Adapter { message: String },

    // Classified provider failures
    #[error("API key rejected by {provider}")]
    InvalidApiKey { provider: String },

    #[error("Quota exhausted for {provider}")]
    InsufficientQuota { provider: String },

    #[error("Rate limited by {provider}")]
    RateLimit { provider: String },

    #[error("Service {provider} unavailable: {message}")]
    ServiceUnavailable { provider: String, message: String },

    #[error("Could not extract content or tool calls from {provider}")]
    ContentExtraction { provider: String },

    // Terminal dispatch outcomes
    #[error("All providers failed{}", describe_last(.last))]
    AllProvidersFailed { last: Option<Box<EngineError>> },

    #[error("Tool-call budget of {limit} iterations exceeded")]
    ToolBudgetExceeded { limit: usize },

    #[error("Key registry used before initialization")]
    NotInitialized,

    // Conversions
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },

    #[error("HTTP client error: {message}")]
    Http { message: String },

    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

impl EngineError {
    pub fn config(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::Config {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
        }
    }

    pub fn service_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Adapter { .. } => ErrorKind::Adapter,
            Self::InvalidApiKey { .. } => ErrorKind::InvalidApiKey,
            Self::InsufficientQuota { .. } => ErrorKind::InsufficientQuota,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::ContentExtraction { .. } => ErrorKind::ContentExtraction,
            Self::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            Self::ToolBudgetExceeded { .. } => ErrorKind::ToolBudgetExceeded,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Io { .. } => ErrorKind::Io,
            Self::Http { .. } => ErrorKind::Http,
            Self::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    /// The key status a classified provider failure moves its key into.
    ///
    /// `None` means the failure is not attributed to the key.
    pub fn key_status(&self) -> Option<KeyStatus> {
        match self {
            Self::InvalidApiKey { .. } => Some(KeyStatus::Invalid),
            Self::InsufficientQuota { .. } => Some(KeyStatus::QuotaExhausted),
            Self::RateLimit { .. } => Some(KeyStatus::RateLimited),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// The underlying cause wrapped by [`EngineError::AllProvidersFailed`].
    pub fn last_cause(&self) -> Option<&EngineError> {
        match self {
            Self::AllProvidersFailed { last } => last.as_deref(),
            _ => None,
        }
    }

    /// Wraps any error escaping the orchestrator that is not one of the
    /// terminal kinds a caller is meant to see.
    pub(crate) fn at_chat_boundary(self) -> Self {
        match self {
            Self::AllProvidersFailed { .. }
            | Self::ToolBudgetExceeded { .. }
            | Self::Unexpected { .. } => self,
            other => Self::Unexpected {
                message: format!("unexpected failure while streaming: {other}"),
            },
        }
    }

    /// Log the error with an appropriate level.
    pub fn log(&self, request_id: Option<&str>) {
        let request_id = request_id.unwrap_or("unknown");
        match self.kind() {
            ErrorKind::InvalidApiKey
            | ErrorKind::InsufficientQuota
            | ErrorKind::RateLimit
            | ErrorKind::ServiceUnavailable
            | ErrorKind::ContentExtraction => {
                warn!(error = %self, request_id, error_kind = %self.kind(), "Provider failure");
            }
            _ => {
                error!(error = %self, request_id, error_kind = %self.kind(), "Engine error");
            }
        }
    }
}

fn describe_last(last: &Option<Box<EngineError>>) -> String {
    last.as_ref()
        .map(|e| format!("; last error: {e}"))
        .unwrap_or_default()
}

/// Result type alias for the engine
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
