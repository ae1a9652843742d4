// src/pruning.rs

use crate::config::ContextManagement;
use crate::message::{Message, Role};
use crate::tokenizer::Tokenizer;
use std::sync::Arc;
use tracing::debug;

/// Bounds the history sent to a provider. The result is always a contiguous,
/// chronological suffix of the input.
#[derive(Clone)]
pub struct ContextPruner {
    strategy: Option<ContextManagement>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ContextPruner {
    pub fn new(strategy: Option<ContextManagement>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { strategy, tokenizer }
    }

    pub fn strategy(&self) -> Option<ContextManagement> {
        self.strategy
    }

    pub fn prune<'a>(&self, history: &'a [Message]) -> &'a [Message] {
        let start = match self.strategy {
            None => return history,
            Some(ContextManagement::SlidingWindow { max_messages }) => {
                history.len().saturating_sub(max_messages)
            }
            Some(ContextManagement::TokenLimit { max_tokens }) => {
                self.token_budget_start(history, max_tokens)
            }
        };

        // A tool result cut off from the call that requested it is rejected
        // by providers.
        let start = history[start..]
            .iter()
            .position(|m| m.role != Role::Tool)
            .map_or(history.len(), |offset| start + offset);

        if start > 0 {
            debug!(dropped = start, kept = history.len() - start, "Pruned conversation history");
        }
        &history[start..]
    }

    fn token_budget_start(&self, history: &[Message], max_tokens: usize) -> usize {
        let mut total = 0;
        let mut start = history.len();
        for (index, message) in history.iter().enumerate().rev() {
            let cost = self.tokenizer.count_message(message);
            if total + cost > max_tokens {
                break;
            }
            total += cost;
            start = index;
        }
        start
    }
}
