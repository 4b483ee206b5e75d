//! Token counting and slicing over the `cl100k_base` encoding.
//!
//! The tokenizer vocabulary is opaque to the rest of the crate; the pipeline
//! only counts tokens and slices token ranges back into text. For a fixed
//! encoder version all operations are deterministic and side-effect-free.

use anyhow::Error as TokenizerError;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{CoreBPE, Rank, cl100k_base};

/// Errors raised while initializing or using the tokenizer.
#[derive(Debug, Error)]
pub enum TokenCounterError {
    /// The `cl100k_base` encoding could not be constructed.
    #[error("failed to initialize cl100k_base encoding: {0}")]
    Init(#[source] TokenizerError),
    /// A token slice could not be decoded back into text.
    #[error("failed to decode token slice: {0}")]
    Decode(#[source] TokenizerError),
}

/// Shared handle over the BPE encoder used for chunk budgeting.
///
/// Cloning is cheap; the underlying encoding is reference-counted.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Construct a counter over the `cl100k_base` encoding.
    pub fn new() -> Result<Self, TokenCounterError> {
        let bpe = cl100k_base().map_err(TokenCounterError::Init)?;
        Ok(Self { bpe: Arc::new(bpe) })
    }

    /// Encode text into token ids.
    pub fn encode(&self, text: &str) -> Vec<Rank> {
        self.bpe.encode_ordinary(text)
    }

    /// Decode a token slice back into text.
    pub fn decode(&self, ids: &[Rank]) -> Result<String, TokenCounterError> {
        self.bpe
            .decode(ids.to_vec())
            .map_err(TokenCounterError::Decode)
    }

    /// Number of tokens the text encodes to.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish()
    }
}
