//! Core data types and error definitions for the processing pipeline.

use crate::{
    extract::ExtractionError, ledger::LedgerError, store::StoreError,
    token_counter::TokenCounterError,
};
use std::time::Duration;
use thiserror::Error;

/// Errors produced while turning raw text into token-bounded chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// The overlap/size pair would make chunking non-terminating.
    #[error("invalid chunking config: overlap {chunk_overlap} must be smaller than size {chunk_size}")]
    InvalidConfig {
        /// Configured chunk size in tokens.
        chunk_size: usize,
        /// Configured overlap in tokens.
        chunk_overlap: usize,
    },
    /// Tokenizer resources were unavailable or a slice failed to decode.
    #[error("tokenizer failure: {0}")]
    Tokenizer(#[from] TokenCounterError),
}

/// Errors raised while persisting chunks or ledger entries.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Chunk-file write or read failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Ledger query or upsert failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The embedding service changed vector dimensionality mid-document.
    #[error("embedding dimension changed mid-document: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the first vector seen in the document.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
}

/// Document-fatal errors emitted by the ingestion pipeline.
///
/// These are caught at the batch orchestrator boundary: the failing document
/// is recorded in the ledger and the run continues with the next one.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Chunking failed for a page of the document.
    #[error("failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// The document could not be read at all.
    #[error("failed to extract document: {0}")]
    Extraction(#[from] ExtractionError),
    /// Every retry of an embedding batch failed outright.
    #[error("embedding batch on page {page} exhausted {attempts} attempts")]
    EmbeddingBatchExhausted {
        /// Page whose batch kept failing.
        page: usize,
        /// Number of attempts made before giving up.
        attempts: u32,
    },
    /// A chunk-file or ledger write failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Per-document totals for a completed ingestion.
#[derive(Debug, Clone)]
pub struct DocumentStats {
    /// Document identifier (file stem).
    pub book: String,
    /// Total pages seen in the document.
    pub pages: usize,
    /// Pages skipped because they held no usable text.
    pub pages_skipped: usize,
    /// Chunks embedded and persisted.
    pub chunks: usize,
    /// Sum of token counts across persisted chunks.
    pub tokens: usize,
    /// Chunk embeddings that failed and were dropped.
    pub failed_chunks: usize,
}

/// Result of running the per-document state machine.
#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    /// The ledger said the document was already processed and `force` was off.
    Skipped,
    /// The document was processed to completion.
    Completed(DocumentStats),
}

/// Aggregate statistics for a whole batch run.
///
/// Threaded through and returned explicitly so repeated or concurrent runs
/// stay independent.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Documents processed to completion in this run.
    pub processed: usize,
    /// Documents skipped because the ledger already covered them.
    pub skipped: usize,
    /// Documents that failed and were recorded as such.
    pub failed: usize,
    /// Chunks persisted across all processed documents.
    pub total_chunks: usize,
    /// Tokens accumulated across all persisted chunks.
    pub total_tokens: usize,
    /// Chunk embeddings dropped due to per-item failures.
    pub failed_chunks: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunStats {
    /// Tokens ingested per second of wall-clock time.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_tokens as f64 / secs
        } else {
            0.0
        }
    }

    /// Mean persisted chunk size in tokens, or zero when nothing landed.
    pub fn average_chunk_tokens(&self) -> usize {
        if self.total_chunks > 0 {
            self.total_tokens / self.total_chunks
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_handles_zero_elapsed() {
        let stats = RunStats::default();
        assert_eq!(stats.tokens_per_second(), 0.0);
        assert_eq!(stats.average_chunk_tokens(), 0);
    }

    #[test]
    fn throughput_is_tokens_over_seconds() {
        let stats = RunStats {
            total_tokens: 3000,
            total_chunks: 10,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert!((stats.tokens_per_second() - 1500.0).abs() < f64::EPSILON);
        assert_eq!(stats.average_chunk_tokens(), 300);
    }
}
