// src/storage/traits.rs

use crate::config::AppConfig;
use crate::error::Result;
use crate::message::Message;
use crate::storage::ApiState;
use async_trait::async_trait;
use std::time::Duration;

/// Persistence of the key registry snapshot.
#[async_trait]
pub trait KeyStateStore: Send + Sync {
    /// Load the persisted snapshot. Absence or an unreadable snapshot yields a
    /// fresh state built from `config`.
    async fn read(&self, config: &AppConfig) -> Result<ApiState>;

    /// Persist the snapshot, replacing the previous one.
    async fn write(&self, state: &ApiState) -> Result<()>;
}

/// Per-session conversation history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Messages of `session_id` in the order they were added.
    async fn history(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn add_message(&self, session_id: &str, message: &Message) -> Result<()>;

    /// Drop the session's history. Returns whether there was anything to drop.
    async fn clear_history(&self, session_id: &str) -> Result<bool>;
}

/// Key/value cache of final answers with per-entry expiry.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
