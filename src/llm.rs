//! Completion client for the question-answering path.
//!
//! Talks to the Ollama `/api/generate` endpoint. Streaming responses are
//! newline-delimited JSON objects carrying a `response` fragment and a `done`
//! flag; an `error` field or non-2xx status is a service failure.

use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors raised while requesting completions.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The HTTP transport failed or timed out.
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("completion service returned status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status of the response.
        status: reqwest::StatusCode,
        /// Raw response body for diagnostics.
        body: String,
    },
    /// The service reported an error mid-stream.
    #[error("completion service error: {0}")]
    Service(String),
    /// A stream line was not valid JSON.
    #[error("malformed stream line: {0}")]
    MalformedLine(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct StreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

/// Client for the completion side of the Ollama API.
pub struct CompletionClient {
    client: Client,
    base_url: String,
    model: String,
}

impl CompletionClient {
    /// Construct a client for the given server URL and model.
    pub fn new(base_url: &str, model: &str) -> Result<Self, CompletionError> {
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

    /// Stream a completion for `prompt`, invoking `on_fragment` for each
    /// partial response and returning the concatenated text.
    pub async fn stream_completion(
        &self,
        prompt: &str,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<String, CompletionError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({ "model": self.model, "prompt": prompt, "stream": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::UnexpectedStatus { status, body });
        }

        let mut full = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if line.is_empty() {
                    continue;
                }
                let parsed: StreamLine = serde_json::from_str(&line)?;
                if let Some(message) = parsed.error {
                    return Err(CompletionError::Service(message));
                }
                if !parsed.response.is_empty() {
                    on_fragment(&parsed.response);
                    full.push_str(&parsed.response);
                }
                if parsed.done {
                    return Ok(full);
                }
            }
        }

        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn stream_completion_concatenates_fragments() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).body(concat!(
                    "{\"response\":\"Hello\",\"done\":false}\n",
                    "{\"response\":\" world\",\"done\":false}\n",
                    "{\"response\":\"\",\"done\":true}\n",
                ));
            })
            .await;

        let client = CompletionClient::new(&server.base_url(), "llama3").expect("client");
        let mut fragments = Vec::new();
        let full = client
            .stream_completion("greet", |fragment| fragments.push(fragment.to_string()))
            .await
            .expect("completion");

        assert_eq!(full, "Hello world");
        assert_eq!(fragments, vec!["Hello".to_string(), " world".to_string()]);
    }

    #[tokio::test]
    async fn stream_completion_surfaces_mid_stream_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .body("{\"error\":\"model overloaded\"}\n");
            })
            .await;

        let client = CompletionClient::new(&server.base_url(), "llama3").expect("client");
        let error = client
            .stream_completion("greet", |_| {})
            .await
            .expect_err("should fail");
        assert!(matches!(error, CompletionError::Service(_)));
    }
}
