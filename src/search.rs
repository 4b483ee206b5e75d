//! Nearest-neighbor retrieval over stored chunks.
//!
//! The query is embedded through the same path used for ingestion (the
//! caller is responsible for keeping the model consistent, or results are
//! meaningless), compared by cosine similarity against every committed
//! chunk, filtered by threshold, and truncated to the top `k`.

use crate::{
    embedding::{EmbeddingClient, EmbeddingError},
    store::{ChunkRecord, ChunkStore, StoreError},
};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors raised while serving a search request.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The query could not be embedded.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Stored chunks could not be loaded.
    #[error("failed to load chunk store: {0}")]
    Store(#[from] StoreError),
    /// Cosine similarity is undefined for zero-norm or mismatched vectors.
    #[error("invalid vector for similarity: {0}")]
    InvalidVector(String),
}

/// A stored chunk paired with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matching chunk record.
    pub chunk: ChunkRecord,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

/// Cosine similarity between two vectors.
///
/// Guards zero-norm and mismatched-dimension inputs with an explicit error
/// instead of propagating NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SearchError> {
    if a.len() != b.len() {
        return Err(SearchError::InvalidVector(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(SearchError::InvalidVector(
            "zero-norm vector has no direction".to_string(),
        ));
    }

    Ok(dot / (norm_a * norm_b))
}

/// Embed `query` and return the `top_k` most similar chunks above `threshold`,
/// sorted by descending similarity.
pub async fn search(
    store: &ChunkStore,
    embedder: &dyn EmbeddingClient,
    query: &str,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<ScoredChunk>, SearchError> {
    let query_embedding = embedder.embed(query).await?;
    let chunks = store.load_all().await?;
    rank_chunks(&query_embedding, chunks, top_k, threshold)
}

/// Rank already-loaded chunks against a query embedding.
pub fn rank_chunks(
    query_embedding: &[f32],
    chunks: Vec<ChunkRecord>,
    top_k: usize,
    threshold: f32,
) -> Result<Vec<ScoredChunk>, SearchError> {
    let mut scored = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let similarity = cosine_similarity(query_embedding, &chunk.embedding)?;
        if similarity > threshold {
            scored.push(ScoredChunk { chunk, similarity });
        }
    }

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(top_k);
    Ok(scored)
}
