// src/handlers/server_error.rs

use super::base::{Action, ResponseHandler};
use crate::error::EngineError;
use reqwest::StatusCode;
use tracing::warn;

const MAX_BODY_IN_MESSAGE: usize = 200;

/// Catch-all: anything not recognised earlier is a transient provider failure.
pub struct ServerErrorHandler;

impl ResponseHandler for ServerErrorHandler {
    fn handle(&self, provider: &str, status: StatusCode, body: &[u8]) -> Option<Action> {
        let body_text = String::from_utf8_lossy(body);
        let excerpt: String = body_text.chars().take(MAX_BODY_IN_MESSAGE).collect();
        warn!(
            provider,
            status = status.as_u16(),
            response_body = %excerpt,
            "Upstream error treated as service unavailable"
        );
        Some(Action::Fail(EngineError::service_unavailable(
            provider,
            format!("HTTP {}: {excerpt}", status.as_u16()),
        )))
    }
}
