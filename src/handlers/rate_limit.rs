// src/handlers/rate_limit.rs

use super::base::{Action, ResponseHandler};
use crate::error::EngineError;
use reqwest::StatusCode;

pub struct RateLimitHandler;

impl ResponseHandler for RateLimitHandler {
    fn handle(&self, provider: &str, status: StatusCode, _body: &[u8]) -> Option<Action> {
        (status == StatusCode::TOO_MANY_REQUESTS).then(|| {
            Action::Fail(EngineError::RateLimit {
                provider: provider.to_string(),
            })
        })
    }
}
