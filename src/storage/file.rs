// src/storage/file.rs

use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::message::Message;
use crate::storage::{ApiState, ConversationStore, KeyStateStore};
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Key registry snapshot stored as pretty-printed JSON.
pub struct FileKeyStateStore {
    path: PathBuf,
}

impl FileKeyStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyStateStore for FileKeyStateStore {
    async fn read(&self, config: &AppConfig) -> Result<ApiState> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No persisted key state found, starting fresh");
                return Ok(ApiState::fresh(config, Utc::now()));
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read key state, starting fresh");
                return Ok(ApiState::fresh(config, Utc::now()));
            }
        };

        match serde_json::from_str::<ApiState>(&content) {
            Ok(state) => {
                debug!(path = %self.path.display(), "Loaded persisted key state");
                Ok(state)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Persisted key state is corrupt, starting fresh");
                Ok(ApiState::fresh(config, Utc::now()))
            }
        }
    }

    async fn write(&self, state: &ApiState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        write_atomically(&self.path, json.as_bytes()).await?;
        trace!(path = %self.path.display(), "Persisted key state");
        Ok(())
    }
}

/// One JSON array file per session under a common directory.
pub struct FileConversationStore {
    dir: PathBuf,
    // Serializes read-modify-write of session files.
    lock: Mutex<()>,
}

impl FileConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_session_id(session_id)))
    }

    async fn read_session(&self, path: &Path) -> Result<Vec<Message>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(EngineError::adapter(format!(
                "failed to read session file {}: {e}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        let _guard = self.lock.lock().await;
        self.read_session(&self.session_path(session_id)).await
    }

    async fn add_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.session_path(session_id);
        let mut messages = self.read_session(&path).await?;
        messages.push(message.clone());
        let json = serde_json::to_string_pretty(&messages)?;
        write_atomically(&path, json.as_bytes()).await
    }

    async fn clear_history(&self, session_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let path = self.session_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::adapter(format!(
                "failed to remove session file {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Session ids become file names; anything outside `[A-Za-z0-9_-]` is replaced.
pub fn sanitize_session_id(session_id: &str) -> String {
    let sanitized: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            EngineError::adapter(format!("failed to create {}: {e}", parent.display()))
        })?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| EngineError::adapter(format!("failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| EngineError::adapter(format!("failed to replace {}: {e}", path.display())))
}
