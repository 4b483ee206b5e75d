//! Chunk-file persistence and checkpoint handling.
//!
//! Each document gets one JSON file holding an ordered array of chunk
//! records. While a document is in flight, a `.tmp.json` sibling holds the
//! latest checkpoint so a crash loses at most one checkpoint interval of
//! chunking and embedding work; the sibling is deleted once the final file is
//! committed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;

/// Errors raised by chunk-file operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A chunk file could not be read or written.
    #[error("chunk store I/O failed for {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A chunk file held malformed JSON.
    #[error("chunk store serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One token-bounded slice of a document page with its embedding.
///
/// Immutable once written; identity is `(book, page, content)`. A fresh run
/// for the same document replaces the whole file rather than appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Document identifier (file stem).
    pub book: String,
    /// One-based page number the chunk came from.
    pub page: usize,
    /// Chunk text, non-empty after trimming.
    pub content: String,
    /// Embedding vector of the service-defined dimension.
    pub embedding: Vec<f32>,
    /// Token count of `content`.
    pub token_count: usize,
    /// RFC3339 timestamp of when the chunk was produced.
    pub processed_at: String,
}

/// Per-book totals derived from a stored chunk file.
#[derive(Debug, Clone)]
pub struct BookSummary {
    /// Document identifier.
    pub book: String,
    /// Number of chunks stored for the book.
    pub chunks: usize,
    /// Sum of token counts across the book's chunks.
    pub tokens: usize,
}

const CHECKPOINT_SUFFIX: &str = ".tmp.json";

/// Directory of per-document chunk files.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Permanent output path for a book.
    pub fn final_path(&self, book: &str) -> PathBuf {
        self.dir.join(format!("{book}.json"))
    }

    /// Checkpoint path for a book while processing is in flight.
    pub fn checkpoint_path(&self, book: &str) -> PathBuf {
        self.dir.join(format!("{book}{CHECKPOINT_SUFFIX}"))
    }

    /// Write the chunks accumulated so far to the book's checkpoint file.
    pub async fn write_checkpoint(
        &self,
        book: &str,
        chunks: &[ChunkRecord],
    ) -> Result<(), StoreError> {
        self.write_snapshot(&self.checkpoint_path(book), chunks)
            .await
    }

    /// Write the final chunk set and remove any checkpoint sibling.
    pub async fn commit(&self, book: &str, chunks: &[ChunkRecord]) -> Result<(), StoreError> {
        self.write_snapshot(&self.final_path(book), chunks).await?;
        self.discard_checkpoint(book).await;
        Ok(())
    }

    /// Remove the checkpoint file for a book, ignoring a missing file.
    pub async fn discard_checkpoint(&self, book: &str) {
        let path = self.checkpoint_path(book);
        if let Err(error) = tokio::fs::remove_file(&path).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %error, "Failed to remove checkpoint");
            }
        }
    }

    async fn write_snapshot(&self, path: &Path, chunks: &[ChunkRecord]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.display().to_string(),
                source,
            })?;
        let payload = serde_json::to_vec_pretty(chunks)?;
        tokio::fs::write(path, payload)
            .await
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    /// Load every committed chunk across all books, skipping checkpoints.
    pub async fn load_all(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        let mut all = Vec::new();
        for path in self.committed_files().await? {
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|source| StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            let chunks: Vec<ChunkRecord> = serde_json::from_slice(&raw)?;
            all.extend(chunks);
        }
        Ok(all)
    }

    /// Summarize committed chunk files per book, sorted by book name.
    pub async fn summaries(&self) -> Result<Vec<BookSummary>, StoreError> {
        let mut summaries = Vec::new();
        for path in self.committed_files().await? {
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|source| StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            let chunks: Vec<ChunkRecord> = serde_json::from_slice(&raw)?;
            let book = chunks
                .first()
                .map(|chunk| chunk.book.clone())
                .unwrap_or_else(|| {
                    path.file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
            summaries.push(BookSummary {
                book,
                chunks: chunks.len(),
                tokens: chunks.iter().map(|chunk| chunk.token_count).sum(),
            });
        }
        summaries.sort_by(|a, b| a.book.cmp(&b.book));
        Ok(summaries)
    }

    async fn committed_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.display().to_string(),
                    source,
                });
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| StoreError::Io {
            path: self.dir.display().to_string(),
            source,
        })? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !name.ends_with(CHECKPOINT_SUFFIX) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Current timestamp formatted for chunk records.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(book: &str, page: usize, content: &str) -> ChunkRecord {
        ChunkRecord {
            book: book.to_string(),
            page,
            content: content.to_string(),
            embedding: vec![0.1, 0.2],
            token_count: 2,
            processed_at: current_timestamp_rfc3339(),
        }
    }

    #[tokio::test]
    async fn commit_writes_final_and_drops_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ChunkStore::new(dir.path());
        let chunks = vec![record("manual", 1, "alpha"), record("manual", 2, "beta")];

        store
            .write_checkpoint("manual", &chunks[..1])
            .await
            .expect("checkpoint");
        assert!(store.checkpoint_path("manual").exists());
        assert!(!store.final_path("manual").exists());

        store.commit("manual", &chunks).await.expect("commit");
        assert!(store.final_path("manual").exists());
        assert!(!store.checkpoint_path("manual").exists());
    }

    #[tokio::test]
    async fn load_all_skips_checkpoints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ChunkStore::new(dir.path());

        store
            .commit("manual", &[record("manual", 1, "alpha")])
            .await
            .expect("commit");
        store
            .write_checkpoint("draft", &[record("draft", 1, "partial")])
            .await
            .expect("checkpoint");

        let all = store.load_all().await.expect("load");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].book, "manual");
    }

    #[tokio::test]
    async fn missing_directory_loads_empty() {
        let store = ChunkStore::new("/nonexistent/tomekeep-store");
        let all = store.load_all().await.expect("load");
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn summaries_aggregate_tokens_per_book() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ChunkStore::new(dir.path());

        store
            .commit(
                "zebra",
                &[record("zebra", 1, "alpha"), record("zebra", 2, "beta")],
            )
            .await
            .expect("commit");
        store
            .commit("aardvark", &[record("aardvark", 1, "gamma")])
            .await
            .expect("commit");

        let summaries = store.summaries().await.expect("summaries");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].book, "aardvark");
        assert_eq!(summaries[1].book, "zebra");
        assert_eq!(summaries[1].chunks, 2);
        assert_eq!(summaries[1].tokens, 4);
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }
}
