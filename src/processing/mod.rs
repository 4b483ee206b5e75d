//! Document processing pipeline: chunking, embedding, checkpointing, and
//! ledger bookkeeping.

pub mod chunking;
mod pipeline;
pub mod types;

pub use chunking::Chunker;
pub use pipeline::{IngestionPipeline, PipelineOptions};
pub use types::{
    ChunkingError, DocumentOutcome, DocumentStats, PersistenceError, PipelineError, RunStats,
};
