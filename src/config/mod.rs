// src/config/mod.rs

pub mod app;
pub mod loader;
pub mod validation;

pub use app::{
    AppConfig, CachingConfig, ContextManagement, DispatchConfig, HealthConfig, HealthMode,
    HttpConfig, PromptingConfig, StorageConfig,
};
pub use loader::{load_config, parse_config};
pub use validation::ConfigValidator;
