// src/handlers/mod.rs

//! Classification of upstream HTTP responses into engine outcomes.

pub mod base;
pub mod invalid_api_key;
pub mod processor;
pub mod quota;
pub mod rate_limit;
pub mod server_error;
pub mod success;

pub use base::{Action, ResponseHandler};
pub use invalid_api_key::InvalidApiKeyHandler;
pub use processor::ResponseProcessor;
pub use quota::QuotaExhaustedHandler;
pub use rate_limit::RateLimitHandler;
pub use server_error::ServerErrorHandler;
pub use success::SuccessHandler;
