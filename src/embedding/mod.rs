//! Embedding client abstraction and the Ollama HTTP adapter.
//!
//! Batches are embedded with one concurrent request per text and a bounded
//! timeout. Individual failures surface as `None` at their position rather
//! than aborting the batch; retry policy belongs to the pipeline, which knows
//! the retry budget and backoff context.

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The HTTP transport failed or timed out.
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("embedding service returned status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status of the response.
        status: reqwest::StatusCode,
        /// Raw response body for diagnostics.
        body: String,
    },
    /// The service reported an error in an otherwise well-formed response.
    #[error("embedding service error: {0}")]
    Service(String),
    /// The response did not contain an embedding vector.
    #[error("embedding response missing 'embedding' field")]
    MissingVector,
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts concurrently.
    ///
    /// The result has the same length and order as the input; failed
    /// positions are `None`. A failure of one request never cancels its
    /// siblings.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let requests = texts.iter().map(|text| async move {
            match self.embed(text).await {
                Ok(vector) => Some(vector),
                Err(error) => {
                    tracing::debug!(error = %error, "Embedding request failed within batch");
                    None
                }
            }
        });
        join_all(requests).await
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
    error: Option<String>,
}

/// Embedding client backed by the Ollama `/api/embeddings` endpoint.
pub struct OllamaEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Construct a client for the given server URL and model.
    pub fn new(base_url: &str, model: &str) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .user_agent("tomekeep/0.2")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Model identifier this client embeds with.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::UnexpectedStatus { status, body });
        }

        let payload: EmbeddingResponse = response.json().await?;
        if let Some(message) = payload.error {
            return Err(EmbeddingError::Service(message));
        }
        payload.embedding.ok_or(EmbeddingError::MissingVector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn embed_parses_vector_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embeddings")
                    .json_body(json!({ "model": "nomic-embed-text", "prompt": "hello" }));
                then.status(200)
                    .json_body(json!({ "embedding": [0.1, 0.2, 0.3] }));
            })
            .await;

        let client =
            OllamaEmbeddingClient::new(&server.base_url(), "nomic-embed-text").expect("client");
        let vector = client.embed("hello").await.expect("embedding");

        mock.assert();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn embed_surfaces_service_error_field() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(200).json_body(json!({ "error": "model not found" }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(&server.base_url(), "missing").expect("client");
        let error = client.embed("hello").await.expect_err("should fail");
        assert!(matches!(error, EmbeddingError::Service(_)));
    }

    #[tokio::test]
    async fn embed_batch_preserves_order_and_marks_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embeddings")
                    .json_body_partial(r#"{ "prompt": "alpha" }"#);
                then.status(200).json_body(json!({ "embedding": [1.0, 0.0] }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embeddings")
                    .json_body_partial(r#"{ "prompt": "beta" }"#);
                then.status(500).body("boom");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embeddings")
                    .json_body_partial(r#"{ "prompt": "gamma" }"#);
                then.status(200).json_body(json!({ "embedding": [0.0, 1.0] }));
            })
            .await;

        let client =
            OllamaEmbeddingClient::new(&server.base_url(), "nomic-embed-text").expect("client");
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let results = client.embed_batch(&texts).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Some(vec![1.0, 0.0]));
        assert_eq!(results[1], None);
        assert_eq!(results[2], Some(vec![0.0, 1.0]));
    }
}
