//! Token-window chunking with sentence-boundary snapping.
//!
//! A page is encoded once and walked with a `[start, end)` token window of
//! `chunk_size` tokens. For every non-final window the tail `chunk_overlap`
//! tokens are decoded and scanned for the last sentence terminator; when one
//! is found the window shrinks to end just after it, trading slightly
//! irregular chunk sizes for not splitting mid-sentence. The window then
//! advances by `chunk_size - chunk_overlap`, so consecutive chunks share at
//! least `chunk_overlap` tokens (except possibly the final pair).

use crate::processing::types::ChunkingError;
use crate::token_counter::TokenCounter;

/// Splits page text into overlapping token-bounded chunk strings.
#[derive(Debug, Clone)]
pub struct Chunker {
    counter: TokenCounter,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Build a chunker, rejecting configurations that cannot terminate.
    pub fn new(
        counter: TokenCounter,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, ChunkingError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ChunkingError::InvalidConfig {
                chunk_size,
                chunk_overlap,
            });
        }
        Ok(Self {
            counter,
            chunk_size,
            chunk_overlap,
        })
    }

    /// Configured chunk size in tokens.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Configured overlap in tokens.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into chunk strings.
    ///
    /// Returns an empty vector when the input is all whitespace. Every
    /// returned chunk is non-empty after trimming and decodes from at most
    /// `chunk_size` tokens.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>, ChunkingError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.counter.encode(text);
        let mut bounds: Vec<(usize, usize)> = Vec::new();
        let mut start = 0usize;

        while start < tokens.len() {
            let hard_end = (start + self.chunk_size).min(tokens.len());
            let mut end = hard_end;

            if hard_end < tokens.len() {
                end = self.snap_to_sentence(&tokens, start, hard_end)?;
            }

            bounds.push((start, end));
            if end >= tokens.len() {
                break;
            }
            // Guarantee forward progress even when snapping shrank the
            // window below the overlap distance.
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        let mut chunks = Vec::with_capacity(bounds.len());
        for (chunk_start, chunk_end) in bounds {
            let decoded = self.counter.decode(&tokens[chunk_start..chunk_end])?;
            let trimmed = decoded.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        }
        Ok(chunks)
    }

    /// Shrink a non-final window to end just after the last sentence
    /// terminator in its overlap region, when one exists.
    fn snap_to_sentence(
        &self,
        tokens: &[tiktoken_rs::Rank],
        start: usize,
        end: usize,
    ) -> Result<usize, ChunkingError> {
        let region_start = end.saturating_sub(self.chunk_overlap);
        let region = self.counter.decode(&tokens[region_start..end])?;

        if let Some(dot) = region.rfind('.') {
            // '.' is ASCII, so the inclusive slice lands on a char boundary.
            let snapped = region_start + self.counter.count(&region[..=dot]);
            if snapped > start && snapped <= end {
                return Ok(snapped);
            }
        }
        Ok(end)
    }
}
