// src/handlers/success.rs

use super::base::{Action, ResponseHandler};
use reqwest::StatusCode;

pub struct SuccessHandler;

impl ResponseHandler for SuccessHandler {
    fn handle(&self, _provider: &str, status: StatusCode, _body: &[u8]) -> Option<Action> {
        status.is_success().then_some(Action::Accept)
    }
}
