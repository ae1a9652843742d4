// src/storage/memory.rs

use crate::config::AppConfig;
use crate::error::Result;
use crate::message::Message;
use crate::storage::{ApiState, ConversationStore, KeyStateStore};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

/// Non-durable key state store. Keeps the last written snapshot.
#[derive(Default)]
pub struct InMemoryKeyStateStore {
    state: RwLock<Option<ApiState>>,
    writes: AtomicUsize,
}

impl InMemoryKeyStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a snapshot, as if it had been persisted earlier.
    pub fn with_state(state: ApiState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn last_written(&self) -> Option<ApiState> {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl KeyStateStore for InMemoryKeyStateStore {
    async fn read(&self, config: &AppConfig) -> Result<ApiState> {
        let guard = self.state.read().await;
        Ok(guard
            .clone()
            .unwrap_or_else(|| ApiState::fresh(config, Utc::now())))
    }

    async fn write(&self, state: &ApiState) -> Result<()> {
        trace!("InMemoryKeyStateStore::write: waiting for write lock");
        let mut guard = self.state.write().await;
        *guard = Some(state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Non-durable conversation store keyed by session id.
#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: DashMap<String, Vec<Message>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn add_message(&self, session_id: &str, message: &Message) -> Result<()> {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn clear_history(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn key_state_store_counts_writes() {
        let config = AppConfig {
            provider_priority: vec!["openai".into()],
            ..AppConfig::default()
        };
        let store = InMemoryKeyStateStore::new();
        let state = store.read(&config).await.unwrap();
        assert_eq!(store.write_count(), 0);

        store.write(&state).await.unwrap();
        store.write(&state).await.unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.last_written().await, Some(state));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = InMemoryConversationStore::new();
        store.add_message("a", &Message::user("one")).await.unwrap();
        store.add_message("b", &Message::user("two")).await.unwrap();

        assert_eq!(store.history("a").await.unwrap(), vec![Message::user("one")]);
        assert!(store.clear_history("a").await.unwrap());
        assert!(store.history("a").await.unwrap().is_empty());
        assert_eq!(store.history("b").await.unwrap().len(), 1);
    }
}
