// src/plugins/performance.rs

use crate::error::{EngineError, Result};
use crate::plugins::{ChatCompletion, ChatContext, HookResult, Plugin};
use crate::tokenizer::Tokenizer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One finished chat as seen by the performance tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub session_id: String,
    pub provider: Option<String>,
    pub latency_ms: u64,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub cached: bool,
    pub success: bool,
    pub error_kind: Option<String>,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: &PerformanceRecord) -> Result<()>;
}

/// Appends records as JSON lines.
pub struct FileMetricsSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl MetricsSink for FileMetricsSink {
    async fn record(&self, record: &PerformanceRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EngineError::adapter(format!("failed to open {}: {e}", self.path.display())))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Records latency, provider, token estimates and outcome of every chat.
pub struct PerformanceTracker {
    sink: Arc<dyn MetricsSink>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl PerformanceTracker {
    pub fn new(sink: Arc<dyn MetricsSink>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { sink, tokenizer }
    }
}

#[async_trait]
impl Plugin for PerformanceTracker {
    fn name(&self) -> &str {
        "performance_tracker"
    }

    async fn on_chat_complete(&self, ctx: &ChatContext, completion: &ChatCompletion) -> HookResult {
        let record = PerformanceRecord {
            timestamp: Utc::now(),
            request_id: ctx.request_id.clone(),
            session_id: ctx.session_id.clone(),
            provider: completion.provider.clone(),
            latency_ms: u64::try_from(ctx.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            prompt_tokens: self.tokenizer.count_tokens(&ctx.user_input),
            completion_tokens: completion
                .response
                .as_deref()
                .map_or(0, |r| self.tokenizer.count_tokens(r)),
            cached: completion.cached,
            success: completion.is_success(),
            error_kind: completion.error.as_ref().map(|(kind, _)| kind.to_string()),
        };
        self.sink.record(&record).await?;
        Ok(())
    }
}
