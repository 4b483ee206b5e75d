//! Content-and-config-addressed processing ledger.
//!
//! The ledger is the sole gate for skip-vs-reprocess decisions: one row per
//! document path holding the file hash, the full processing configuration,
//! and the outcome of the latest attempt. A successful row whose
//! `(file_hash, config)` tuple matches the current run is authoritative proof
//! that no reprocessing is needed unless `force` is requested.
//!
//! Processor versions are recorded append-only in a second table so that
//! provenance survives a ledger reset.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;
use thiserror::Error;

/// Version tag for the chunking behavior; bump on behavior-changing edits.
pub const CHUNKER_VERSION: &str = "token-window-sentence-snap/1";
/// Version tag for the embedding behavior; bump on behavior-changing edits.
pub const EMBEDDER_VERSION: &str = "ollama-embeddings/1";

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The backing store rejected a query.
    #[error("ledger query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// The document could not be read for hashing.
    #[error("failed to hash {path}: {source}")]
    Hashing {
        /// Path of the offending document.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Metadata could not be serialized for storage.
    #[error("failed to serialize ledger metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Outcome recorded for a processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// The document was fully processed and persisted.
    Completed,
    /// The attempt failed; `error_message` explains why.
    Failed,
}

impl ProcessingStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Configuration fingerprinted into every ledger entry.
///
/// Any change to a field invalidates cached entries for a path, forcing
/// reprocessing. `processor_version` captures the effective chunking and
/// embedding behavior so that two builds with different logic are never
/// treated as equivalent even when the textual knobs match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingConfig {
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    /// Token overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Embedding model identifier.
    pub embed_model: String,
    /// Fingerprint of the effective chunking/embedding behavior.
    pub processor_version: String,
}

impl ProcessingConfig {
    /// Build a config for the current chunker and embedder behavior.
    pub fn new(chunk_size: usize, chunk_overlap: usize, embed_model: &str) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            embed_model: embed_model.to_string(),
            processor_version: processor_fingerprint(),
        }
    }
}

/// Hash of the behavior version tags, truncated to 12 hex chars.
fn processor_fingerprint() -> String {
    let mut hasher = Sha256::new();
    hasher.update(CHUNKER_VERSION.as_bytes());
    hasher.update(b"\n");
    hasher.update(EMBEDDER_VERSION.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

/// Compute the SHA-256 hash of a file's bytes.
pub async fn compute_file_hash(path: &Path) -> Result<String, LedgerError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| LedgerError::Hashing {
            path: path.display().to_string(),
            source,
        })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Persistent record of which `(file, config)` combinations have been processed.
pub struct ProcessingLedger {
    pool: SqlitePool,
}

impl ProcessingLedger {
    /// Connect to (or create) the ledger database and ensure the schema.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        // In-memory SQLite gives each pooled connection its own database, so
        // those URLs must stay on a single connection.
        let max_connections =
            if database_url.contains(":memory:") || database_url.contains("mode=memory") {
                1
            } else {
                5
            };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let ledger = Self { pool };
        ledger.ensure_schema().await?;
        Ok(ledger)
    }

    async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_documents (
                file_path TEXT PRIMARY KEY,
                file_hash TEXT NOT NULL,
                chunk_size INTEGER NOT NULL,
                chunk_overlap INTEGER NOT NULL,
                embed_model TEXT NOT NULL,
                processor_version TEXT NOT NULL,
                chunks_count INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                processed_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processor_versions (
                version_hash TEXT PRIMARY KEY,
                config_json TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Decide whether a document needs processing under `config`.
    ///
    /// Returns `(true, last_error)` when the document must run: either it has
    /// never been seen with this exact `(file_hash, config)` tuple, or its
    /// last attempt failed (in which case the stored error is surfaced).
    /// Returns `(false, None)` when a completed entry matches exactly.
    pub async fn should_process(
        &self,
        file_path: &Path,
        config: &ProcessingConfig,
        force: bool,
    ) -> Result<(bool, Option<String>), LedgerError> {
        if force {
            return Ok((true, None));
        }

        let file_hash = compute_file_hash(file_path).await?;
        let row = sqlx::query(
            r#"
            SELECT status, error_message
            FROM processed_documents
            WHERE file_path = ?1
              AND file_hash = ?2
              AND chunk_size = ?3
              AND chunk_overlap = ?4
              AND embed_model = ?5
              AND processor_version = ?6
            "#,
        )
        .bind(file_path.display().to_string())
        .bind(&file_hash)
        .bind(config.chunk_size as i64)
        .bind(config.chunk_overlap as i64)
        .bind(&config.embed_model)
        .bind(&config.processor_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok((true, None)),
            Some(row) => {
                let status: String = row.try_get("status")?;
                if status == "failed" {
                    let error: Option<String> = row.try_get("error_message")?;
                    Ok((true, error))
                } else {
                    Ok((false, None))
                }
            }
        }
    }

    /// Upsert the ledger entry for a processing attempt.
    ///
    /// The ledger is per-path latest-attempt, not a history: a conflicting
    /// row for the same path is overwritten. The processor version is
    /// registered append-only (no-op when the hash was already seen).
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        file_path: &Path,
        config: &ProcessingConfig,
        chunks_count: usize,
        total_tokens: usize,
        status: ProcessingStatus,
        error_message: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<(), LedgerError> {
        let file_hash = compute_file_hash(file_path).await?;
        let config_json = serde_json::to_string(config)?;

        sqlx::query(
            r#"
            INSERT INTO processor_versions (version_hash, config_json)
            VALUES (?1, ?2)
            ON CONFLICT (version_hash) DO NOTHING
            "#,
        )
        .bind(&config.processor_version)
        .bind(&config_json)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO processed_documents (
                file_path, file_hash, chunk_size, chunk_overlap,
                embed_model, processor_version, chunks_count,
                total_tokens, status, error_message, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (file_path) DO UPDATE SET
                file_hash = excluded.file_hash,
                chunk_size = excluded.chunk_size,
                chunk_overlap = excluded.chunk_overlap,
                embed_model = excluded.embed_model,
                processor_version = excluded.processor_version,
                chunks_count = excluded.chunks_count,
                total_tokens = excluded.total_tokens,
                status = excluded.status,
                error_message = excluded.error_message,
                metadata = excluded.metadata,
                processed_at = datetime('now')
            "#,
        )
        .bind(file_path.display().to_string())
        .bind(&file_hash)
        .bind(config.chunk_size as i64)
        .bind(config.chunk_overlap as i64)
        .bind(&config.embed_model)
        .bind(&config.processor_version)
        .bind(chunks_count as i64)
        .bind(total_tokens as i64)
        .bind(status.as_str())
        .bind(error_message)
        .bind(metadata.to_string())
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            path = %file_path.display(),
            status = status.as_str(),
            chunks = chunks_count,
            tokens = total_tokens,
            "Recorded processing attempt"
        );

        Ok(())
    }

    /// Remove all processing records while keeping version provenance.
    pub async fn reset(&self) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM processed_documents")
            .execute(&self.pool)
            .await?;
        tracing::info!("Ledger entries cleared; provenance retained");
        Ok(())
    }

    /// Remove all processing records and version provenance.
    pub async fn clear_all(&self) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM processed_documents")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM processor_versions")
            .execute(&self.pool)
            .await?;
        tracing::info!("Ledger and provenance cleared");
        Ok(())
    }

    /// Number of recorded processor versions, for diagnostics.
    pub async fn version_count(&self) -> Result<u64, LedgerError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM processor_versions")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn memory_ledger() -> ProcessingLedger {
        ProcessingLedger::connect("sqlite::memory:")
            .await
            .expect("ledger")
    }

    fn fixture(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        assert_eq!(processor_fingerprint(), processor_fingerprint());
        assert_eq!(processor_fingerprint().len(), 12);
    }

    #[tokio::test]
    async fn unseen_document_should_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        let (run, last_error) = ledger
            .should_process(&path, &config, false)
            .await
            .expect("decision");
        assert!(run);
        assert!(last_error.is_none());
    }

    #[tokio::test]
    async fn should_process_is_idempotent_without_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        let first = ledger
            .should_process(&path, &config, false)
            .await
            .expect("first");
        let second = ledger
            .should_process(&path, &config, false)
            .await
            .expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn completed_entry_skips_and_force_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        ledger
            .record(
                &path,
                &config,
                10,
                4000,
                ProcessingStatus::Completed,
                None,
                serde_json::json!({}),
            )
            .await
            .expect("record");

        let (run, _) = ledger
            .should_process(&path, &config, false)
            .await
            .expect("decision");
        assert!(!run);

        let (forced, _) = ledger
            .should_process(&path, &config, true)
            .await
            .expect("forced");
        assert!(forced);
    }

    #[tokio::test]
    async fn failed_entry_is_retried_with_last_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        ledger
            .record(
                &path,
                &config,
                0,
                0,
                ProcessingStatus::Failed,
                Some("embedding batch exhausted"),
                serde_json::json!({}),
            )
            .await
            .expect("record");

        let (run, last_error) = ledger
            .should_process(&path, &config, false)
            .await
            .expect("decision");
        assert!(run);
        assert_eq!(last_error.as_deref(), Some("embedding batch exhausted"));
    }

    #[tokio::test]
    async fn any_config_change_invalidates_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        ledger
            .record(
                &path,
                &config,
                10,
                4000,
                ProcessingStatus::Completed,
                None,
                serde_json::json!({}),
            )
            .await
            .expect("record");

        let variants = [
            ProcessingConfig {
                chunk_size: 256,
                ..config.clone()
            },
            ProcessingConfig {
                chunk_overlap: 25,
                ..config.clone()
            },
            ProcessingConfig {
                embed_model: "mxbai-embed-large".to_string(),
                ..config.clone()
            },
            ProcessingConfig {
                processor_version: "deadbeef0000".to_string(),
                ..config.clone()
            },
        ];

        for variant in variants {
            let (run, _) = ledger
                .should_process(&path, &variant, false)
                .await
                .expect("decision");
            assert!(run, "expected invalidation for {variant:?}");
        }
    }

    #[tokio::test]
    async fn changed_file_bytes_invalidate_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        ledger
            .record(
                &path,
                &config,
                10,
                4000,
                ProcessingStatus::Completed,
                None,
                serde_json::json!({}),
            )
            .await
            .expect("record");

        std::fs::write(&path, "revised content").expect("rewrite");
        let (run, _) = ledger
            .should_process(&path, &config, false)
            .await
            .expect("decision");
        assert!(run);
    }

    #[tokio::test]
    async fn record_upserts_per_path_and_versions_are_append_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        ledger
            .record(
                &path,
                &config,
                0,
                0,
                ProcessingStatus::Failed,
                Some("transient"),
                serde_json::json!({}),
            )
            .await
            .expect("first record");
        ledger
            .record(
                &path,
                &config,
                12,
                5000,
                ProcessingStatus::Completed,
                None,
                serde_json::json!({"pages": 3}),
            )
            .await
            .expect("second record");

        let (run, _) = ledger
            .should_process(&path, &config, false)
            .await
            .expect("decision");
        assert!(!run, "latest attempt wins");
        assert_eq!(ledger.version_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn reset_keeps_provenance_clear_all_removes_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = fixture(&dir, "book.txt", "content");
        let ledger = memory_ledger().await;
        let config = ProcessingConfig::new(512, 50, "nomic-embed-text");

        ledger
            .record(
                &path,
                &config,
                10,
                4000,
                ProcessingStatus::Completed,
                None,
                serde_json::json!({}),
            )
            .await
            .expect("record");

        ledger.reset().await.expect("reset");
        let (run, _) = ledger
            .should_process(&path, &config, false)
            .await
            .expect("decision");
        assert!(run, "entries gone after reset");
        assert_eq!(ledger.version_count().await.expect("count"), 1);

        ledger.clear_all().await.expect("clear");
        assert_eq!(ledger.version_count().await.expect("count"), 0);
    }
}
