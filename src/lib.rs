#![deny(missing_docs)]

//! Core library for the Tomekeep knowledge-base builder.

/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and the Ollama HTTP adapter.
pub mod embedding;
/// Page extraction collaborators for raw documents.
pub mod extract;
/// Content-addressed processing ledger backed by SQLite.
pub mod ledger;
/// Completion service client for question answering.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Document processing pipeline: chunking, embedding, checkpointing.
pub mod processing;
/// Nearest-neighbor retrieval over stored chunks.
pub mod search;
/// Chunk-file persistence and checkpoint handling.
pub mod store;
/// Token counting utilities over the `cl100k_base` encoding.
pub mod token_counter;
