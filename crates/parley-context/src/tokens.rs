//! Token counting
//!
//! [`TokenCounter`] is shared across concurrent requests behind an `Arc`, so
//! implementations must be pure and `Send + Sync`. The default
//! [`EstimateCounter`] needs no tokenizer files; enable the `token-counting`
//! feature for [`TokenizerCounter`], which wraps a HuggingFace tokenizer.

use crate::context::Message;

/// Framing tokens the chat format spends on every message.
const TOKENS_PER_MESSAGE: usize = 3;
/// Tokens that prime the assistant reply.
const REPLY_PRIMING_TOKENS: usize = 3;
const CHARS_PER_TOKEN: usize = 4;

/// Counts the prompt tokens a model would see for a message list.
///
/// Counts must be deterministic and must not decrease when a message is
/// added to the list.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, model: &str, messages: &[Message]) -> usize;
}

/// Character based estimate (about four characters per token).
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateCounter;

impl EstimateCounter {
    fn count_text(text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

impl TokenCounter for EstimateCounter {
    fn count_tokens(&self, _model: &str, messages: &[Message]) -> usize {
        if messages.is_empty() {
            return 0;
        }

        let body: usize = messages
            .iter()
            .map(|m| {
                TOKENS_PER_MESSAGE
                    + Self::count_text(m.role.as_str())
                    + Self::count_text(&m.content)
            })
            .sum();

        body + REPLY_PRIMING_TOKENS
    }
}

#[cfg(feature = "token-counting")]
pub use tokenizer::TokenizerCounter;

#[cfg(feature = "token-counting")]
mod tokenizer {
    use std::path::Path;

    use tokenizers::Tokenizer;

    use super::{EstimateCounter, TokenCounter, REPLY_PRIMING_TOKENS, TOKENS_PER_MESSAGE};
    use crate::context::Message;
    use crate::error::{ContextError, ContextResult};

    /// Counter backed by a HuggingFace `tokenizer.json`.
    pub struct TokenizerCounter {
        tokenizer: Tokenizer,
    }

    impl TokenizerCounter {
        pub fn from_file(path: impl AsRef<Path>) -> ContextResult<Self> {
            let tokenizer = Tokenizer::from_file(path)
                .map_err(|e| ContextError::TokenCountError(e.to_string()))?;
            Ok(Self { tokenizer })
        }

        fn count_text(&self, text: &str) -> usize {
            match self.tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(err) => {
                    tracing::warn!(error = %err, "tokenizer failed, using estimate");
                    EstimateCounter::count_text(text)
                }
            }
        }
    }

    impl TokenCounter for TokenizerCounter {
        fn count_tokens(&self, _model: &str, messages: &[Message]) -> usize {
            if messages.is_empty() {
                return 0;
            }

            let body: usize = messages
                .iter()
                .map(|m| TOKENS_PER_MESSAGE + self.count_text(m.role.as_str()) + self.count_text(&m.content))
                .sum();

            body + REPLY_PRIMING_TOKENS
        }
    }
}
