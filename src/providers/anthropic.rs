//! Anthropic Messages API adapter.
//!
//! - Auth via `x-api-key` plus the `anthropic-version` header
//! - System messages are hoisted into the top-level `system` field

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use sovereign_rag_core::models::{GenerationResult, Message, Role, Usage};

use super::{ensure_success, http_client, read_json, transport_error, Provider};
use crate::error::{Error, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    model_id: String,
    name: String,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(name: &str, api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            model_id: format!("anthropic/{name}"),
            name: name.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn build_request_body(&self, messages: &[Message]) -> Value {
        let (system, rest): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.role == Role::System);

        let messages_json: Vec<Value> = rest
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": self.name,
            "messages": messages_json,
            "max_tokens": MAX_TOKENS,
        });

        if !system.is_empty() {
            let text = system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            body["system"] = Value::String(text);
        }

        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn model(&self) -> &str {
        &self.model_id
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        debug!(model = %self.model_id, messages = messages.len(), "anthropic messages");
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_request_body(messages))
            .send()
            .await
            .map_err(|e| transport_error(&self.model_id, &self.base_url, self.timeout, e))?;

        let response = ensure_success(&self.model_id, &self.base_url, response).await?;
        let json = read_json(&self.model_id, &self.base_url, response).await?;

        let content = json["content"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                Error::provider(
                    &self.model_id,
                    &self.base_url,
                    "malformed response: missing content[0].text",
                )
            })?
            .to_string();

        let usage = match (
            json["usage"]["input_tokens"].as_u64(),
            json["usage"]["output_tokens"].as_u64(),
        ) {
            (Some(input), Some(output)) => Some(Usage::new(input, output)),
            _ => None,
        };

        Ok(GenerationResult {
            content,
            model: self.model_id.clone(),
            usage,
        })
    }
}
