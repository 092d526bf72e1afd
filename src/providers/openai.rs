//! OpenAI chat completions adapter.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use sovereign_rag_core::models::{GenerationResult, Message, Usage};

use super::{ensure_success, http_client, read_json, transport_error, Provider};
use crate::error::{Error, Result};

const TEMPERATURE: f64 = 0.7;

pub struct OpenAiProvider {
    client: reqwest::Client,
    model_id: String,
    name: String,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(name: &str, api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            model_id: format!("openai/{name}"),
            name: name.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.model_id
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        let body = serde_json::json!({
            "model": self.name,
            "messages": messages,
            "temperature": TEMPERATURE,
        });

        debug!(model = %self.model_id, messages = messages.len(), "openai chat completion");
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.model_id, &self.base_url, self.timeout, e))?;

        let response = ensure_success(&self.model_id, &self.base_url, response).await?;
        let json = read_json(&self.model_id, &self.base_url, response).await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                Error::provider(
                    &self.model_id,
                    &self.base_url,
                    "malformed response: missing choices[0].message.content",
                )
            })?
            .to_string();

        let usage = &json["usage"];
        let usage = match (
            usage["prompt_tokens"].as_u64(),
            usage["completion_tokens"].as_u64(),
        ) {
            (Some(prompt), Some(completion)) => Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: usage["total_tokens"]
                    .as_u64()
                    .unwrap_or(prompt + completion),
            }),
            _ => None,
        };

        Ok(GenerationResult {
            content,
            model: self.model_id.clone(),
            usage,
        })
    }
}
