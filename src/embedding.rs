//! Ollama embedding client.
//!
//! Calls `POST {url}/api/embeddings` with `{model, prompt}` and reads the
//! `embedding` array from the response.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use sovereign_rag_core::embedding::{Embedder, EmbeddingError};

use crate::config::Config;

/// Embedder backed by a local or remote Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: Option<usize>,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_url(config, &config.embedding_url())
    }

    /// Same settings as [`OllamaEmbedder::new`], against another Ollama instance.
    pub fn with_url(config: &Config, url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.embedding.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model: config.embedding.model.clone(),
            dims: config.embedding.dims,
            max_retries: config.embedding.max_retries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let endpoint = format!("{}/api/embeddings", self.url);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&endpoint).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
                        let vector = parse_embedding_response(&json)?;
                        self.check_dims(&vector)?;
                        return Ok(vector);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = EmbeddingError::Status {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = status.as_u16(), attempt, "embedding backend error");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    warn!(endpoint = %self.url, attempt, "embedding backend unreachable");
                    last_err = Some(EmbeddingError::Unreachable {
                        endpoint: self.url.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingError::Malformed("embedding failed after retries".to_string())
        }))
    }
}

impl OllamaEmbedder {
    fn check_dims(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        match self.dims {
            Some(expected) if vector.len() != expected => Err(EmbeddingError::Dimensions {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing embedding array".to_string()))?;

    if values.is_empty() {
        return Err(EmbeddingError::Malformed("empty embedding array".to_string()));
    }

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Malformed("non-numeric embedding value".to_string()))
        })
        .collect()
}
