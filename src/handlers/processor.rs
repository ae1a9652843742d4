// src/handlers/processor.rs

use crate::error::EngineError;
use crate::handlers::base::{Action, ResponseHandler};
use crate::handlers::{
    InvalidApiKeyHandler, QuotaExhaustedHandler, RateLimitHandler, ServerErrorHandler,
    SuccessHandler,
};
use reqwest::StatusCode;
use std::sync::Arc;

/// Runs a response through a chain of handlers; the first match wins.
#[derive(Clone)]
pub struct ResponseProcessor {
    handlers: Arc<Vec<Box<dyn ResponseHandler>>>,
}

impl ResponseProcessor {
    pub fn new(handlers: Vec<Box<dyn ResponseHandler>>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Classify a response. Unmatched responses are service-unavailable.
    pub fn classify(&self, provider: &str, status: StatusCode, body: &[u8]) -> Action {
        self.handlers
            .iter()
            .find_map(|handler| handler.handle(provider, status, body))
            .unwrap_or_else(|| {
                Action::Fail(EngineError::service_unavailable(
                    provider,
                    format!("unclassified HTTP {}", status.as_u16()),
                ))
            })
    }
}

impl Default for ResponseProcessor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(SuccessHandler),
            Box::new(InvalidApiKeyHandler),
            Box::new(QuotaExhaustedHandler),
            Box::new(RateLimitHandler),
            Box::new(ServerErrorHandler),
        ])
    }
}
