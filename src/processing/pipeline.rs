//! Ingestion orchestrator.
//!
//! Drives a document through extraction, chunking, embedding, checkpointing,
//! and ledger bookkeeping. One document's failure never aborts the batch:
//! `process_books` catches per-document errors, records them in the ledger,
//! and carries on.

use crate::{
    embedding::EmbeddingClient,
    extract::PageExtractor,
    ledger::{ProcessingConfig, ProcessingLedger, ProcessingStatus},
    processing::{
        chunking::Chunker,
        types::{DocumentOutcome, DocumentStats, PersistenceError, PipelineError, RunStats},
    },
    store::{ChunkRecord, ChunkStore, current_timestamp_rfc3339},
    token_counter::TokenCounter,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Tunables for batch embedding and checkpointing.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Number of chunks embedded per concurrent batch.
    pub batch_size: usize,
    /// Maximum attempts for a fully failed embedding batch.
    pub max_retries: u32,
    /// Pages between durable checkpoints of partial chunk output.
    pub checkpoint_interval: usize,
    /// Base delay for linear-multiple backoff between batch retries.
    pub backoff_base: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            checkpoint_interval: 10,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Coordinates the full ingestion pipeline for a directory of documents.
///
/// Documents are processed strictly one at a time; concurrency lives inside
/// each embedding batch. All skip-vs-reprocess decisions go through the
/// ledger's backing store, never an in-memory cache, so independent runs
/// against the same storage always agree.
pub struct IngestionPipeline {
    chunker: Chunker,
    counter: TokenCounter,
    extractor: Box<dyn PageExtractor>,
    embedder: Arc<dyn EmbeddingClient>,
    ledger: ProcessingLedger,
    store: ChunkStore,
    config: ProcessingConfig,
    options: PipelineOptions,
}

impl IngestionPipeline {
    /// Assemble a pipeline from its collaborators.
    ///
    /// Fails with `InvalidConfig` before any I/O when the chunking knobs are
    /// unusable.
    pub fn new(
        config: ProcessingConfig,
        options: PipelineOptions,
        extractor: Box<dyn PageExtractor>,
        embedder: Arc<dyn EmbeddingClient>,
        ledger: ProcessingLedger,
        store: ChunkStore,
    ) -> Result<Self, PipelineError> {
        let counter = TokenCounter::new().map_err(crate::processing::ChunkingError::from)?;
        let chunker = Chunker::new(counter.clone(), config.chunk_size, config.chunk_overlap)?;
        Ok(Self {
            chunker,
            counter,
            extractor,
            embedder,
            ledger,
            store,
            config,
            options,
        })
    }

    /// Processing configuration this pipeline records against.
    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Run the per-document state machine for one document.
    ///
    /// `Pending → Skipped` when the ledger says the exact `(file, config)`
    /// tuple already completed and `force` is off; otherwise
    /// `Pending → InProgress → {Completed | Failed}` with the outcome always
    /// recorded in the ledger.
    pub async fn process_document(
        &self,
        path: &Path,
        force: bool,
    ) -> Result<DocumentOutcome, PipelineError> {
        let (needs_run, last_error) = self
            .ledger
            .should_process(path, &self.config, force)
            .await
            .map_err(PersistenceError::from)?;

        if !needs_run {
            tracing::info!(path = %path.display(), "Already processed; skipping");
            return Ok(DocumentOutcome::Skipped);
        }
        if let Some(previous) = last_error {
            tracing::info!(
                path = %path.display(),
                previous_error = %previous,
                "Retrying previously failed document"
            );
        }

        let book = book_name(path);
        match self.run_document(path, &book).await {
            Ok(stats) => {
                self.ledger
                    .record(
                        path,
                        &self.config,
                        stats.chunks,
                        stats.tokens,
                        ProcessingStatus::Completed,
                        None,
                        json!({
                            "pages": stats.pages,
                            "pages_skipped": stats.pages_skipped,
                            "failed_chunks": stats.failed_chunks,
                        }),
                    )
                    .await
                    .map_err(PersistenceError::from)?;
                tracing::info!(
                    book = %stats.book,
                    chunks = stats.chunks,
                    tokens = stats.tokens,
                    failed_chunks = stats.failed_chunks,
                    "Document processed"
                );
                Ok(DocumentOutcome::Completed(stats))
            }
            Err(error) => {
                self.store.discard_checkpoint(&book).await;
                if let Err(record_error) = self
                    .ledger
                    .record(
                        path,
                        &self.config,
                        0,
                        0,
                        ProcessingStatus::Failed,
                        Some(&error.to_string()),
                        json!({}),
                    )
                    .await
                {
                    tracing::error!(
                        path = %path.display(),
                        error = %record_error,
                        "Failed to record processing failure"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run_document(&self, path: &Path, book: &str) -> Result<DocumentStats, PipelineError> {
        let pages = self.extractor.extract_pages(path)?;
        let checkpoint_interval = self.options.checkpoint_interval.max(1);

        let mut chunks: Vec<ChunkRecord> = Vec::new();
        let mut dimension: Option<usize> = None;
        let mut pages_skipped = 0usize;
        let mut failed_chunks = 0usize;
        let mut tokens = 0usize;

        for (index, text) in pages.iter().enumerate() {
            let page = index + 1;
            if text.trim().is_empty() {
                pages_skipped += 1;
                continue;
            }

            let page_chunks = self.chunker.chunk(text)?;
            for batch in page_chunks.chunks(self.options.batch_size.max(1)) {
                let embeddings = self.embed_with_retry(batch, page).await?;
                for (content, embedding) in batch.iter().zip(embeddings) {
                    let Some(vector) = embedding else {
                        failed_chunks += 1;
                        continue;
                    };
                    let expected = *dimension.get_or_insert(vector.len());
                    if vector.len() != expected {
                        return Err(PersistenceError::DimensionMismatch {
                            expected,
                            actual: vector.len(),
                        }
                        .into());
                    }
                    let token_count = self.counter.count(content);
                    tokens += token_count;
                    chunks.push(ChunkRecord {
                        book: book.to_string(),
                        page,
                        content: content.clone(),
                        embedding: vector,
                        token_count,
                        processed_at: current_timestamp_rfc3339(),
                    });
                }
            }

            if page % checkpoint_interval == 0 {
                self.store
                    .write_checkpoint(book, &chunks)
                    .await
                    .map_err(PersistenceError::from)?;
                tracing::debug!(book, page, chunks = chunks.len(), "Checkpoint written");
            }
        }

        self.store
            .commit(book, &chunks)
            .await
            .map_err(PersistenceError::from)?;

        Ok(DocumentStats {
            book: book.to_string(),
            pages: pages.len(),
            pages_skipped,
            chunks: chunks.len(),
            tokens,
            failed_chunks,
        })
    }

    /// Embed a batch, retrying only when every position in it failed.
    ///
    /// Partial success is accepted as-is; failed positions are dropped by the
    /// caller and counted, never retried individually.
    async fn embed_with_retry(
        &self,
        batch: &[String],
        page: usize,
    ) -> Result<Vec<Option<Vec<f32>>>, PipelineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let attempts = self.options.max_retries.max(1);
        for attempt in 1..=attempts {
            let embeddings = self.embedder.embed_batch(batch).await;
            debug_assert_eq!(embeddings.len(), batch.len());
            if embeddings.iter().any(Option::is_some) {
                return Ok(embeddings);
            }
            tracing::warn!(page, attempt, size = batch.len(), "Entire embedding batch failed");
            if attempt < attempts {
                tokio::time::sleep(self.options.backoff_base * attempt).await;
            }
        }

        Err(PipelineError::EmbeddingBatchExhausted { page, attempts })
    }

    /// Process every `.txt` document directly under `books_dir`.
    ///
    /// The run always finishes: per-document failures are logged, recorded in
    /// the ledger, and counted. Chunk files already committed for completed
    /// documents are retained even when later documents fail.
    pub async fn process_books(&self, books_dir: &Path, force: bool) -> RunStats {
        let started = Instant::now();
        let mut stats = RunStats::default();

        let mut documents: Vec<_> = WalkDir::new(books_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        documents.sort();

        if documents.is_empty() {
            tracing::warn!(dir = %books_dir.display(), "No documents found in directory");
            stats.elapsed = started.elapsed();
            return stats;
        }

        for path in &documents {
            match self.process_document(path, force).await {
                Ok(DocumentOutcome::Completed(doc)) => {
                    stats.processed += 1;
                    stats.total_chunks += doc.chunks;
                    stats.total_tokens += doc.tokens;
                    stats.failed_chunks += doc.failed_chunks;
                }
                Ok(DocumentOutcome::Skipped) => stats.skipped += 1,
                Err(error) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %error,
                        "Document failed; continuing with the rest of the batch"
                    );
                    stats.failed += 1;
                }
            }
        }

        stats.elapsed = started.elapsed();
        tracing::info!(
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            chunks = stats.total_chunks,
            tokens = stats.total_tokens,
            elapsed_secs = stats.elapsed.as_secs_f64(),
            "Batch run complete"
        );
        stats
    }
}

/// Document identifier derived from the file stem.
fn book_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
