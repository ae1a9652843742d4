// src/tokenizer.rs

use crate::message::Message;
use std::sync::Arc;
use tracing::info;

/// Counts tokens of a text for context budgeting.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Tokens of a whole message: its text plus any tool-call arguments.
    fn count_message(&self, message: &Message) -> usize {
        let calls: usize = message
            .requested_tool_calls()
            .iter()
            .map(|call| self.count_tokens(&call.function.name) + self.count_tokens(&call.function.arguments))
            .sum();
        self.count_tokens(&message.content) + calls
    }
}

/// Character-based estimate: roughly four ASCII characters per token, one
/// token per non-ASCII character.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproximateTokenizer;

impl Tokenizer for ApproximateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let ascii = text.chars().filter(char::is_ascii).count();
        let other = text.chars().count() - ascii;
        (ascii.div_ceil(4) + other).max(1)
    }
}

#[cfg(feature = "tiktoken")]
mod bpe {
    use super::Tokenizer;
    use once_cell::sync::OnceCell;
    use tiktoken_rs::CoreBPE;

    static CL100K: OnceCell<CoreBPE> = OnceCell::new();

    /// `cl100k_base` byte-pair encoding.
    pub struct TiktokenTokenizer {
        bpe: &'static CoreBPE,
    }

    impl TiktokenTokenizer {
        pub fn cl100k() -> Result<Self, String> {
            let bpe = CL100K
                .get_or_try_init(tiktoken_rs::cl100k_base)
                .map_err(|e| e.to_string())?;
            Ok(Self { bpe })
        }
    }

    impl Tokenizer for TiktokenTokenizer {
        fn count_tokens(&self, text: &str) -> usize {
            self.bpe.encode_with_special_tokens(text).len()
        }
    }
}

#[cfg(feature = "tiktoken")]
pub use bpe::TiktokenTokenizer;

/// The tokenizer used when none is injected: `cl100k_base` with the
/// `tiktoken` feature, the character estimate otherwise.
pub fn default_tokenizer() -> Arc<dyn Tokenizer> {
    #[cfg(feature = "tiktoken")]
    {
        match TiktokenTokenizer::cl100k() {
            Ok(tokenizer) => {
                info!("Using tiktoken cl100k_base for context budgeting");
                return Arc::new(tokenizer);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load tiktoken, using approximate token counts")
            }
        }
    }
    info!("Using approximate token counts for context budgeting");
    Arc::new(ApproximateTokenizer)
}
