//! Token counting and prefix truncation
//!
//! Uses the cl100k_base encoding, which is what the OpenAI embedding
//! models tokenize with, so a truncated input always lands on a token
//! boundary the model agrees with.

use crate::errors::{AppError, Result};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Shared tokenizer handle
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Load the cl100k_base tokenizer
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| AppError::Configuration {
            message: format!("Failed to load cl100k_base tokenizer: {}", e),
        })?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Count tokens in `text`
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Longest token prefix of `text` holding at most `max_tokens` tokens.
    ///
    /// Returns the input unchanged when it already fits. When the cut falls
    /// inside a multi-byte character the prefix shrinks token by token until
    /// it decodes cleanly.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }

        let mut end = max_tokens;
        while end > 0 {
            if let Ok(prefix) = self.bpe.decode(tokens[..end].to_vec()) {
                return prefix;
            }
            end -= 1;
        }
        String::new()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").field("encoding", &"cl100k_base").finish()
    }
}
