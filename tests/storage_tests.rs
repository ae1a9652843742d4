// tests/storage_tests.rs

mod common;

use chat_relay::plugins::PerformanceRecord;
use chat_relay::storage::{ApiState, ConversationStore, FileConversationStore, KeyStatus};
use chat_relay::{ChatEngine, ChatOptions, Message};
use common::{openai_error, openai_reply, TestConfigBuilder};
use futures::StreamExt;
use std::sync::Arc;
use tempfile::tempdir;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer};

#[tokio::test]
async fn engine_persists_sessions_key_state_and_metrics() {
    let server = MockServer::start().await;
    Mock::given(path("/groq/chat/completions"))
        .respond_with(openai_error(429, "rate_limit_exceeded"))
        .mount(&server)
        .await;
    Mock::given(path("/openai/chat/completions"))
        .respond_with(openai_reply("Stored answer"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let state_path = dir.path().join("data/api_state.json");
    let sessions_dir = dir.path().join("data/sessions");
    let metrics_path = dir.path().join("data/performance.jsonl");
    let config = TestConfigBuilder::new()
        .provider("groq", &["gsk-1"])
        .provider("openai", &["sk-1"])
        .base_url("groq", format!("{}/groq", server.uri()))
        .base_url("openai", format!("{}/openai", server.uri()))
        .with(|c| {
            c.storage.state_path = state_path.clone();
            c.storage.sessions_dir = sessions_dir.clone();
            c.storage.metrics_path = Some(metrics_path.clone());
        })
        .build();

    let engine = ChatEngine::builder(config).build().unwrap();
    engine.bootstrap().await.unwrap();
    let events: Vec<_> = engine
        .chat_stream("user/42", "remember this", ChatOptions::default())
        .collect()
        .await;
    assert!(events.iter().all(Result::is_ok));
    engine.shutdown().await.unwrap();

    let sessions = FileConversationStore::new(&sessions_dir);
    assert_eq!(
        sessions.history("user/42").await.unwrap(),
        vec![Message::user("remember this"), Message::assistant("Stored answer")]
    );
    assert!(sessions_dir.join("user_42.json").exists());

    let state: ApiState =
        serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
    assert_eq!(state.provider_priority, ["openai", "groq"]);
    assert_eq!(state.keys("groq")[0].status, KeyStatus::RateLimited);

    let metrics = std::fs::read_to_string(&metrics_path).unwrap();
    let records: Vec<PerformanceRecord> = metrics
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].session_id, "user/42");
    assert_eq!(records[0].provider.as_deref(), Some("openai"));
    assert!(records[0].success);
}

#[tokio::test]
async fn persisted_state_is_reconciled_with_new_configuration() {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("api_state.json");

    let first = TestConfigBuilder::new()
        .provider("groq", &["gsk-1"])
        .provider("openai", &["sk-1"])
        .with(|c| c.storage.state_path = state_path.clone())
        .build();
    let engine = ChatEngine::builder(first)
        .conversation_store(Arc::new(chat_relay::storage::InMemoryConversationStore::new()))
        .build()
        .unwrap();
    engine.bootstrap().await.unwrap();
    engine
        .registry()
        .update_key_status("sk-1", KeyStatus::Invalid)
        .await
        .unwrap();
    engine.shutdown().await.unwrap();

    // groq removed, a second openai key and perplexity added.
    let second = TestConfigBuilder::new()
        .provider("openai", &["sk-1", "sk-2"])
        .provider("perplexity", &["pplx-1"])
        .with(|c| c.storage.state_path = state_path.clone())
        .build();
    let engine = ChatEngine::builder(second)
        .conversation_store(Arc::new(chat_relay::storage::InMemoryConversationStore::new()))
        .build()
        .unwrap();
    engine.bootstrap().await.unwrap();
    let state = engine.snapshot().await.unwrap();
    engine.shutdown().await.unwrap();

    assert!(!state.providers.contains_key("groq"));
    assert_eq!(state.provider_priority, ["openai", "perplexity"]);
    let statuses: Vec<(&str, KeyStatus)> = state
        .keys("openai")
        .iter()
        .map(|r| (r.key.as_str(), r.status))
        .collect();
    assert_eq!(statuses, [("sk-1", KeyStatus::Invalid), ("sk-2", KeyStatus::Active)]);
}

#[tokio::test]
async fn engine_restarts_background_tasks_after_shutdown() {
    let config = TestConfigBuilder::new()
        .provider("openai", &["sk-1"])
        .caching(60)
        .with(|c| c.health.disabled = false)
        .build();
    let engine = ChatEngine::builder(config)
        .key_store(Arc::new(chat_relay::storage::InMemoryKeyStateStore::new()))
        .conversation_store(Arc::new(chat_relay::storage::InMemoryConversationStore::new()))
        .build()
        .unwrap();

    engine.bootstrap().await.unwrap();
    assert_eq!(engine.running_tasks().await, 2);
    engine.shutdown().await.unwrap();
    assert_eq!(engine.running_tasks().await, 0);

    engine.bootstrap().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(engine.running_tasks().await, 2);
    engine.shutdown().await.unwrap();
}
