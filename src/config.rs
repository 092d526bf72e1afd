//! TOML configuration.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Credentials left unset in the file fall back to the `OLLAMA_ENDPOINT`,
//! `ANTHROPIC_API_KEY` and `OPENAI_API_KEY` environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/srag.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Ollama base URL for embeddings. Defaults to the chat Ollama endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_embedding_model(),
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_embed_char_limit")]
    pub embed_char_limit: usize,
    #[serde(default = "default_context_char_limit")]
    pub context_char_limit: usize,
    #[serde(default = "default_snippet_char_limit")]
    pub snippet_char_limit: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embed_char_limit: default_embed_char_limit(),
            context_char_limit: default_context_char_limit(),
            snippet_char_limit: default_snippet_char_limit(),
            default_limit: default_limit(),
        }
    }
}

fn default_embed_char_limit() -> usize {
    5000
}
fn default_context_char_limit() -> usize {
    1000
}
fn default_snippet_char_limit() -> usize {
    200
}
fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub ollama_endpoint: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            ollama_endpoint: None,
            anthropic_api_key: None,
            openai_api_key: None,
            anthropic_base_url: default_anthropic_base_url(),
            openai_base_url: default_openai_base_url(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_provider_timeout() -> u64 {
    120
}

/// Ollama endpoint used when neither the file nor the environment sets one.
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_iterations")]
    pub default_iterations: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Per-worker deadline during fan-out. `0` disables it.
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_iterations: default_iterations(),
            max_iterations: default_max_iterations(),
            max_workers: default_max_workers(),
            worker_timeout_secs: default_worker_timeout(),
        }
    }
}

fn default_model() -> String {
    "ollama/qwen2.5-coder".to_string()
}
fn default_iterations() -> u32 {
    3
}
fn default_max_iterations() -> u32 {
    10
}
fn default_max_workers() -> usize {
    3
}
fn default_worker_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3210".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            allowed_mime_types: default_mime_types(),
            allowed_extensions: default_extensions(),
        }
    }
}

fn default_max_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_mime_types() -> Vec<String> {
    ["text/plain", "text/markdown", "application/json", "text/csv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_extensions() -> Vec<String> {
    ["txt", "md", "json", "csv", "py", "js", "ts", "tsx", "jsx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// In-memory configuration with every default applied.
    pub fn minimal() -> Self {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config
    }

    /// Ollama endpoint for generation: file, then `OLLAMA_ENDPOINT`, then the local default.
    pub fn ollama_endpoint(&self) -> String {
        self.providers
            .ollama_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string())
    }

    /// Ollama endpoint for embeddings.
    pub fn embedding_url(&self) -> String {
        self.embedding
            .url
            .clone()
            .unwrap_or_else(|| self.ollama_endpoint())
    }

    /// Fill unset credentials from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if self.providers.ollama_endpoint.is_none() {
            self.providers.ollama_endpoint = lookup("OLLAMA_ENDPOINT");
        }
        if self.providers.anthropic_api_key.is_none() {
            self.providers.anthropic_api_key = lookup("ANTHROPIC_API_KEY");
        }
        if self.providers.openai_api_key.is_none() {
            self.providers.openai_api_key = lookup("OPENAI_API_KEY");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.default_limit < 1 {
            anyhow::bail!("retrieval.default_limit must be >= 1");
        }
        if self.retrieval.embed_char_limit == 0 {
            anyhow::bail!("retrieval.embed_char_limit must be > 0");
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when set");
        }
        if self.embedding.model.trim().is_empty() {
            anyhow::bail!("embedding.model must not be empty");
        }
        if !(1..=self.orchestrator.max_iterations).contains(&self.orchestrator.default_iterations) {
            anyhow::bail!(
                "orchestrator.default_iterations must be in [1, {}]",
                self.orchestrator.max_iterations
            );
        }
        if self.orchestrator.max_workers == 0 {
            anyhow::bail!("orchestrator.max_workers must be >= 1");
        }
        if self.upload.max_bytes == 0 {
            anyhow::bail!("upload.max_bytes must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.apply_env();
    config.validate()?;

    Ok(config)
}
