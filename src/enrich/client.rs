use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat endpoint returned no message content")]
    EmptyResponse,
}

/// A single-turn chat completion: one model, one user message, one reply.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, model: &str, input: &str) -> Result<String, EnrichmentError>;

    /// Whether the backing server answers at all. Used for logging only.
    async fn is_reachable(&self) -> bool {
        true
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Client for an Ollama server's `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnrichmentError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn chat(&self, model: &str, input: &str) -> Result<String, EnrichmentError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model,
            messages: [ChatMessage {
                role: "user",
                content: input,
            }],
            stream: false,
        };

        debug!(model, "Ollama chat request");

        let response = self.http.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::Status { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .message
            .map(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(EnrichmentError::EmptyResponse)
    }

    async fn is_reachable(&self) -> bool {
        match self.http.get(&self.base_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Ollama health check failed");
                false
            }
        }
    }
}
