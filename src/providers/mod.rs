//! Provider abstraction over heterogeneous LLM backends.
//!
//! A model is addressed by a namespaced identifier such as
//! `"ollama/llama3.2"`, `"anthropic/claude-sonnet-4-20250514"` or
//! `"openai/gpt-4o"`. [`ModelRef::parse`] decodes the identifier once at the
//! boundary; [`create_provider`] turns it plus a [`ProviderSettings`] value
//! into a ready [`Provider`].
//!
//! Adapters strip their namespace before talking to the backend and report
//! the full namespaced id in [`GenerationResult::model`].
//!
//! | Family | Endpoint | Streams |
//! |--------|----------|---------|
//! | [`ollama`] | `POST {endpoint}/api/generate` | yes (NDJSON) |
//! | [`anthropic`] | `POST {base}/v1/messages` | no |
//! | [`openai`] | `POST {base}/v1/chat/completions` | no |

pub mod anthropic;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use sovereign_rag_core::models::{GenerationResult, Message};

use crate::config::Config;
use crate::error::{Error, Result};

/// Incremental text chunks from a streaming provider. The producing task
/// stops once the receiver is dropped.
pub type TextStream = mpsc::Receiver<Result<String>>;

/// Capacity of the channel behind a [`TextStream`].
pub(crate) const STREAM_BUFFER: usize = 32;

/// Uniform contract over one configured backend model.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Full namespaced model id, e.g. `"ollama/llama3.2"`.
    fn model(&self) -> &str;

    /// Backend base URL, for diagnostics.
    fn endpoint(&self) -> &str;

    /// Produce one completion for the conversation.
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream the completion as text chunks.
    async fn stream(&self, _messages: &[Message]) -> Result<TextStream> {
        Err(Error::provider(
            self.model(),
            self.endpoint(),
            "streaming is not supported by this provider",
        ))
    }
}

/// A decoded model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelRef {
    Ollama(String),
    Anthropic(String),
    OpenAi(String),
    /// Anything without a known `<provider>/` prefix, kept verbatim.
    Unrecognized(String),
}

impl ModelRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let Some((family, name)) = raw.split_once('/') else {
            return ModelRef::Unrecognized(raw.to_string());
        };
        if name.is_empty() {
            return ModelRef::Unrecognized(raw.to_string());
        }
        match family {
            "ollama" => ModelRef::Ollama(name.to_string()),
            "anthropic" => ModelRef::Anthropic(name.to_string()),
            "openai" => ModelRef::OpenAi(name.to_string()),
            _ => ModelRef::Unrecognized(raw.to_string()),
        }
    }

    /// The backend-native model name without the namespace.
    pub fn name(&self) -> &str {
        match self {
            ModelRef::Ollama(n) | ModelRef::Anthropic(n) | ModelRef::OpenAi(n) => n,
            ModelRef::Unrecognized(raw) => raw,
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRef::Ollama(n) => write!(f, "ollama/{n}"),
            ModelRef::Anthropic(n) => write!(f, "anthropic/{n}"),
            ModelRef::OpenAi(n) => write!(f, "openai/{n}"),
            ModelRef::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// Endpoints and credentials for provider construction, resolved once per
/// request from request overrides, the config file and the environment.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub ollama_endpoint: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

impl ProviderSettings {
    pub fn from_config(config: &Config) -> Self {
        let p = &config.providers;
        Self {
            ollama_endpoint: Some(config.ollama_endpoint()),
            anthropic_api_key: p.anthropic_api_key.clone(),
            openai_api_key: p.openai_api_key.clone(),
            anthropic_base_url: p.anthropic_base_url.clone(),
            openai_base_url: p.openai_base_url.clone(),
            timeout: Duration::from_secs(p.timeout_secs),
        }
    }

    /// Apply per-request overrides. Blank values are ignored.
    pub fn with_overrides(
        mut self,
        ollama_endpoint: Option<String>,
        anthropic_api_key: Option<String>,
        openai_api_key: Option<String>,
    ) -> Self {
        fn pick(over: Option<String>, base: Option<String>) -> Option<String> {
            over.filter(|v| !v.trim().is_empty()).or(base)
        }
        self.ollama_endpoint = pick(ollama_endpoint, self.ollama_endpoint);
        self.anthropic_api_key = pick(anthropic_api_key, self.anthropic_api_key);
        self.openai_api_key = pick(openai_api_key, self.openai_api_key);
        self
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn missing_setting(model: &ModelRef, message: &str) -> Error {
    Error::Configuration {
        message: message.to_string(),
        model: Some(model.to_string()),
    }
}

/// Build the adapter for `model`. Performs no network I/O.
pub fn create_provider(model: &ModelRef, settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    match model {
        ModelRef::Ollama(name) => {
            let endpoint = non_blank(&settings.ollama_endpoint)
                .ok_or_else(|| missing_setting(model, "Ollama endpoint not configured"))?;
            Ok(Arc::new(ollama::OllamaProvider::new(
                name,
                endpoint,
                settings.timeout,
            )?))
        }
        ModelRef::Anthropic(name) => {
            let key = non_blank(&settings.anthropic_api_key)
                .ok_or_else(|| missing_setting(model, "Anthropic API key not configured"))?;
            Ok(Arc::new(anthropic::AnthropicProvider::new(
                name,
                key,
                &settings.anthropic_base_url,
                settings.timeout,
            )?))
        }
        ModelRef::OpenAi(name) => {
            let key = non_blank(&settings.openai_api_key)
                .ok_or_else(|| missing_setting(model, "OpenAI API key not configured"))?;
            Ok(Arc::new(openai::OpenAiProvider::new(
                name,
                key,
                &settings.openai_base_url,
                settings.timeout,
            )?))
        }
        ModelRef::Unrecognized(raw) => Err(Error::UnknownProvider(raw.clone())),
    }
}

// ============ Shared HTTP plumbing ============

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))
}

/// Client for long-lived response bodies: `timeout` bounds connecting and
/// each read, not the whole transfer.
pub(crate) fn streaming_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))
}

/// Map a transport failure to `Timeout` or `Provider`.
pub(crate) fn transport_error(
    model: &str,
    endpoint: &str,
    timeout: Duration,
    err: reqwest::Error,
) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            secs: timeout.as_secs(),
        }
    } else {
        Error::provider(model, endpoint, format!("request failed: {err}"))
    }
}

/// Pass through success responses; turn anything else into a `Provider` error.
pub(crate) async fn ensure_success(
    model: &str,
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::provider(
        model,
        endpoint,
        format!("HTTP {}: {}", status.as_u16(), body.trim()),
    ))
}

pub(crate) async fn read_json(
    model: &str,
    endpoint: &str,
    response: reqwest::Response,
) -> Result<serde_json::Value> {
    response
        .json()
        .await
        .map_err(|e| Error::provider(model, endpoint, format!("malformed response: {e}")))
}
