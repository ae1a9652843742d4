// src/handlers/invalid_api_key.rs

use super::base::{error_field, Action, ResponseHandler};
use crate::error::EngineError;
use reqwest::StatusCode;

/// 401/403, and the 400 `API_KEY_INVALID` answer Gemini gives for bad keys.
pub struct InvalidApiKeyHandler;

impl ResponseHandler for InvalidApiKeyHandler {
    fn handle(&self, provider: &str, status: StatusCode, body: &[u8]) -> Option<Action> {
        let rejected = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => true,
            StatusCode::BAD_REQUEST => {
                String::from_utf8_lossy(body).contains("API_KEY_INVALID")
                    || error_field(body, "code").as_deref() == Some("invalid_api_key")
            }
            _ => false,
        };
        rejected.then(|| {
            Action::Fail(EngineError::InvalidApiKey {
                provider: provider.to_string(),
            })
        })
    }
}
