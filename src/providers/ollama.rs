//! Ollama adapter (local inference).
//!
//! Ollama's generate endpoint takes a single prompt, so the conversation is
//! flattened into `"role: content"` blocks separated by a blank line.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use sovereign_rag_core::models::{GenerationResult, Message, Usage};

use super::{
    ensure_success, http_client, read_json, streaming_http_client, transport_error, Provider,
    TextStream, STREAM_BUFFER,
};
use crate::error::{Error, Result};

pub struct OllamaProvider {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    model_id: String,
    name: String,
    endpoint: String,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(name: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            stream_client: streaming_http_client(timeout)?,
            model_id: format!("ollama/{name}"),
            name: name.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn post_generate(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "model": self.name,
            "prompt": flatten_messages(messages),
            "stream": stream,
        });

        debug!(model = %self.model_id, stream, "ollama generate");
        let client = if stream { &self.stream_client } else { &self.client };
        let response = client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.model_id, &self.endpoint, self.timeout, e))?;

        ensure_success(&self.model_id, &self.endpoint, response).await
    }
}

/// `"user: hi\n\nassistant: hello"`
pub fn flatten_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Provider for OllamaProvider {
    fn model(&self) -> &str {
        &self.model_id
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult> {
        let response = self.post_generate(messages, false).await?;
        let json = read_json(&self.model_id, &self.endpoint, response).await?;

        let content = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| {
                Error::provider(
                    &self.model_id,
                    &self.endpoint,
                    "malformed response: missing response field",
                )
            })?
            .to_string();

        let usage = match (
            json.get("prompt_eval_count").and_then(|v| v.as_u64()),
            json.get("eval_count").and_then(|v| v.as_u64()),
        ) {
            (Some(p), Some(c)) => Some(Usage::new(p, c)),
            _ => None,
        };

        Ok(GenerationResult {
            content,
            model: self.model_id.clone(),
            usage,
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream(&self, messages: &[Message]) -> Result<TextStream> {
        let response = self.post_generate(messages, true).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut bytes = response.bytes_stream();
        let model_id = self.model_id.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let mut decoder = NdjsonDecoder::default();
            while let Some(item) = bytes.next().await {
                match item {
                    Ok(chunk) => {
                        for event in decoder.push(&chunk) {
                            match event {
                                StreamEvent::Text(text) => {
                                    if tx.send(Ok(text)).await.is_err() {
                                        return;
                                    }
                                }
                                StreamEvent::Done => return,
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(transport_error(&model_id, &endpoint, timeout, e))).await;
                        return;
                    }
                }
            }
            for event in decoder.finish() {
                if let StreamEvent::Text(text) = event {
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Text(String),
    Done,
}

/// Splits an NDJSON byte stream into events. Lines may span network chunks.
#[derive(Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl NdjsonDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line, &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        self.decode_line(&rest, &mut events);
        events
    }

    fn decode_line(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        // Malformed lines are skipped.
        let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else {
            return;
        };
        if let Some(text) = json.get("response").and_then(|r| r.as_str()) {
            if !text.is_empty() {
                events.push(StreamEvent::Text(text.to_string()));
            }
        }
        if json.get("done").and_then(|d| d.as_bool()) == Some(true) {
            self.done = true;
            events.push(StreamEvent::Done);
        }
    }
}
