// src/handlers/base.rs

use crate::error::EngineError;
use reqwest::StatusCode;
use serde_json::Value;

/// Outcome of classifying one upstream response.
#[derive(Debug)]
pub enum Action {
    /// The response carries a reply to extract.
    Accept,
    /// The request failed. The error kind decides whether the key or the
    /// provider is held responsible.
    Fail(EngineError),
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Action::Accept, Action::Accept) => true,
            (Action::Fail(a), Action::Fail(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

/// One link of the classification chain.
pub trait ResponseHandler: Send + Sync {
    /// `Some` when this handler recognises the response, `None` to defer to
    /// the next handler.
    fn handle(&self, provider: &str, status: StatusCode, body: &[u8]) -> Option<Action>;
}

/// Reads `error.<field>` from a JSON error body, if present as a string.
pub(crate) fn error_field(body: &[u8], field: &str) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("error")?
        .get(field)?
        .as_str()
        .map(str::to_string)
}
