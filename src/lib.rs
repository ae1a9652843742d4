// src/lib.rs

//! Resilient multi-provider chat dispatch.
//!
//! A [`ChatEngine`] sends a conversation to the highest-ranked healthy
//! provider, rotating API keys within a provider and falling back across
//! providers when keys are rate limited, out of quota or rejected. Key health
//! is persisted between runs and recovered by a background loop.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod key_manager;
pub mod message;
pub mod metrics;
pub mod monitoring;
pub mod orchestrator;
pub mod plugins;
pub mod providers;
pub mod pruning;
pub mod storage;
pub mod tokenizer;
pub mod tools;
pub mod upstream;
pub mod utils;

pub use config::AppConfig;
pub use dispatcher::{Dispatch, Dispatched, FallbackDispatcher};
pub use engine::{ChatEngine, ChatEngineBuilder};
pub use error::{EngineError, ErrorKind, Result};
pub use key_manager::KeyRegistry;
pub use message::{ChatOptions, Message, Role, ToolCall, ToolChoice, ToolDefinition};
pub use orchestrator::{ChatEvent, ChatStream};
pub use plugins::{Plugin, PluginPipeline};
pub use providers::{AdapterRegistry, ProviderAdapter};
pub use tools::{Tool, ToolError, ToolOutcome, ToolRegistry};
