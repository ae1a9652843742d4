// src/handlers/quota.rs

use super::base::{error_field, Action, ResponseHandler};
use crate::error::EngineError;
use reqwest::StatusCode;

/// 429 whose body names the `insufficient_quota` error type.
pub struct QuotaExhaustedHandler;

impl ResponseHandler for QuotaExhaustedHandler {
    fn handle(&self, provider: &str, status: StatusCode, body: &[u8]) -> Option<Action> {
        if status != StatusCode::TOO_MANY_REQUESTS {
            return None;
        }
        let exhausted = ["type", "code"]
            .iter()
            .any(|field| error_field(body, field).as_deref() == Some("insufficient_quota"));
        exhausted.then(|| {
            Action::Fail(EngineError::InsufficientQuota {
                provider: provider.to_string(),
            })
        })
    }
}
