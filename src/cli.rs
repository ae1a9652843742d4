use chat_relay::config::{load_config, ConfigValidator};
use chat_relay::providers::AdapterRegistry;
use chat_relay::storage::{FileKeyStateStore, KeyStatus};
use chat_relay::utils::preview_key;
use chat_relay::{AppConfig, ChatEngine, ChatEvent, ChatOptions, KeyRegistry, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "chat-relay",
    version,
    about = "Multi-provider chat dispatch with key rotation and provider fallback",
    long_about = "Sends a prompt through a prioritized list of LLM providers, rotating API keys, falling back between providers and persisting key health between runs."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml", env = "CHAT_RELAY_CONFIG")]
    pub config: PathBuf,

    /// Enable JSON logging
    #[arg(long, env = "CHAT_RELAY_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one prompt and stream the answer to stdout
    Ask {
        /// The user message
        prompt: String,

        /// Conversation session id
        #[arg(short, long, default_value = "default")]
        session: String,

        /// System prompt override for this call
        #[arg(long)]
        system: Option<String>,
    },

    /// Validate the configuration file
    Validate,

    /// Show the persisted status of every configured key
    Keys,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    match cli.command {
        Commands::Ask {
            prompt,
            session,
            system,
        } => ask(config, &session, prompt, system).await,
        Commands::Validate => validate(&config),
        Commands::Keys => keys(config).await,
    }
}

async fn ask(config: AppConfig, session: &str, prompt: String, system: Option<String>) -> Result<()> {
    let engine = ChatEngine::builder(config).build()?;
    engine.bootstrap().await?;

    let mut options = ChatOptions::default();
    if let Some(system) = system {
        options = options.with_system_prompt(system);
    }

    let mut events = engine.chat_stream(session, prompt, options);
    let mut stdout = std::io::stdout();
    let mut outcome = Ok(());
    while let Some(event) = events.next().await {
        match event {
            Ok(ChatEvent::Chunk(text)) | Ok(ChatEvent::CachedResponse(text)) => {
                print!("{text}");
                stdout.flush()?;
            }
            Ok(ChatEvent::ToolCall(calls)) => {
                info!(calls = calls.len(), "Provider requested tools");
            }
            Ok(ChatEvent::ToolResult(_)) => {}
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    drop(events);
    println!();

    engine.shutdown().await?;
    outcome
}

fn validate(config: &AppConfig) -> Result<()> {
    let adapters = AdapterRegistry::for_config(config);
    ConfigValidator::validate_against_adapters(config, &adapters)?;

    let total_keys: usize = config.api_keys.values().map(Vec::len).sum();
    println!("Configuration is valid");
    println!("  providers: {}", config.provider_priority.join(", "));
    println!("  keys:      {total_keys}");
    println!("  tools:     {}", config.tools.len());
    Ok(())
}

async fn keys(config: AppConfig) -> Result<()> {
    let store = Arc::new(FileKeyStateStore::new(&config.storage.state_path));
    let registry = KeyRegistry::new(Arc::new(config), store);
    registry.initialize().await?;
    let state = registry.snapshot().await?;

    println!("Priority: {}", state.provider_priority.join(" > "));
    for provider in &state.provider_priority {
        println!("{provider}:");
        for record in state.keys(provider) {
            let cooldown = match (record.status, record.cooldown_until) {
                (KeyStatus::RateLimited, Some(until)) => format!(" until {}", until.to_rfc3339()),
                _ => String::new(),
            };
            println!(
                "  {:<16} {}{} (failures: {})",
                preview_key(&record.key),
                record.status,
                cooldown,
                record.failure_count
            );
        }
    }
    registry.shutdown().await
}
