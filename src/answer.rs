//! The "answer this" operation.
//!
//! [`Assistant::answer`] ties the pieces together: resolve provider
//! settings, optionally ground the message in retrieved documents, build an
//! [`Orchestrator`] for the request, dispatch on [`Mode`], and normalize the
//! outcome into an [`AnswerResponse`].

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use sovereign_rag_core::models::{GenerationResult, Message, Source, Usage};
use sovereign_rag_core::retrieval::RetrievalEngine;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::providers::{create_provider, ModelRef, ProviderSettings, TextStream};
use crate::runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Chat,
    Workers,
    Ralph,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(Mode::Chat),
            "workers" => Ok(Mode::Workers),
            "ralph" => Ok(Mode::Ralph),
            other => Err(Error::InvalidRequest(format!(
                "unknown mode '{other}', expected chat, workers or ralph"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub message: String,
    /// Namespaced chat model; defaults to `orchestrator.default_model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub worker_models: Vec<String>,
    #[serde(default)]
    pub ralph_iterations: Option<u32>,
    #[serde(default)]
    pub use_rag: bool,
    /// Deliver the answer incrementally (chat mode only).
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub ollama_endpoint: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub answer: String,
    /// The model whose output is `answer`.
    pub model: String,
    /// Every model that was called.
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_results: Option<Vec<GenerationResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<Vec<GenerationResult>>,
}

/// Answers requests against configured providers and an optional corpus.
#[derive(Clone)]
pub struct Assistant {
    config: Arc<Config>,
    retrieval: Option<RetrievalEngine>,
}

impl Assistant {
    pub fn new(config: Arc<Config>, retrieval: Option<RetrievalEngine>) -> Self {
        Self { config, retrieval }
    }

    pub fn retrieval(&self) -> Option<&RetrievalEngine> {
        self.retrieval.as_ref()
    }

    pub async fn answer(&self, req: AnswerRequest) -> Result<AnswerResponse> {
        let orchestrator = self.prepare(&req)?;
        let (prompt, sources) = self.ground(&req).await?;

        match req.mode {
            Mode::Chat => {
                let result = orchestrator.chat(&[Message::user(prompt)]).await?;
                Ok(AnswerResponse {
                    models: vec![result.model.clone()],
                    answer: result.content,
                    model: result.model,
                    usage: result.usage,
                    sources,
                    worker_results: None,
                    iterations: None,
                })
            }
            Mode::Workers => {
                let results = orchestrator.run_workers(&prompt).await?;
                let first = results.first().ok_or_else(|| {
                    Error::InvalidRequest("workers mode requires at least one worker model".into())
                })?;
                Ok(AnswerResponse {
                    answer: first.content.clone(),
                    model: first.model.clone(),
                    models: results.iter().map(|r| r.model.clone()).collect(),
                    usage: Usage::sum(results.iter().map(|r| &r.usage)),
                    sources,
                    worker_results: Some(results),
                    iterations: None,
                })
            }
            Mode::Ralph => {
                let n = req
                    .ralph_iterations
                    .unwrap_or(self.config.orchestrator.default_iterations);
                let results = orchestrator.ralph_loop(&prompt, n).await?;
                let last = results
                    .last()
                    .ok_or_else(|| Error::InvalidRequest("ralph loop produced no output".into()))?;
                Ok(AnswerResponse {
                    answer: last.content.clone(),
                    model: last.model.clone(),
                    models: vec![last.model.clone()],
                    usage: Usage::sum(results.iter().map(|r| &r.usage)),
                    sources,
                    worker_results: None,
                    iterations: Some(results),
                })
            }
        }
    }

    /// Stream a chat-mode answer. Sources are known before the first chunk.
    pub async fn answer_stream(&self, req: AnswerRequest) -> Result<(TextStream, Vec<Source>)> {
        if req.mode != Mode::Chat {
            return Err(Error::InvalidRequest(
                "streaming is only available in chat mode".into(),
            ));
        }
        let orchestrator = self.prepare(&req)?;
        let (prompt, sources) = self.ground(&req).await?;
        let stream = orchestrator.stream_chat(&[Message::user(prompt)]).await?;
        Ok((stream, sources))
    }

    /// Validate the request and build its providers. No network I/O.
    fn prepare(&self, req: &AnswerRequest) -> Result<Orchestrator> {
        if req.message.trim().is_empty() {
            return Err(Error::InvalidRequest("message must not be empty".into()));
        }

        let settings = ProviderSettings::from_config(&self.config).with_overrides(
            req.ollama_endpoint.clone(),
            req.anthropic_api_key.clone(),
            req.openai_api_key.clone(),
        );
        let orch_config = &self.config.orchestrator;

        let model_id = req
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&orch_config.default_model);
        let chat = create_provider(&ModelRef::parse(model_id), &settings)?;

        let workers = if req.mode == Mode::Workers {
            if req.worker_models.is_empty() {
                return Err(Error::InvalidRequest(
                    "workers mode requires at least one worker model".into(),
                ));
            }
            if req.worker_models.len() > orch_config.max_workers {
                return Err(Error::InvalidRequest(format!(
                    "at most {} worker models are allowed, got {}",
                    orch_config.max_workers,
                    req.worker_models.len()
                )));
            }
            req.worker_models
                .iter()
                .map(|id| create_provider(&ModelRef::parse(id), &settings))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let worker_timeout = match orch_config.worker_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Orchestrator::new(chat)
            .with_workers(workers)
            .with_worker_timeout(worker_timeout)
            .with_max_iterations(orch_config.max_iterations))
    }

    /// Build the grounded prompt, embedding through the request's Ollama
    /// endpoint when it names one. Retrieval failures degrade to the raw
    /// message.
    async fn ground(&self, req: &AnswerRequest) -> Result<(String, Vec<Source>)> {
        let message = req.message.as_str();
        if !req.use_rag {
            return Ok((message.to_string(), Vec::new()));
        }
        let Some(engine) = &self.retrieval else {
            debug!("retrieval requested but no document store is configured");
            return Ok((message.to_string(), Vec::new()));
        };
        let engine =
            runtime::engine_for_endpoint(engine, &self.config, req.ollama_endpoint.as_deref())?;

        match engine
            .search(message, self.config.retrieval.default_limit)
            .await
        {
            Ok(results) => {
                let ctx = engine.contextualize(message, &results);
                debug!(sources = ctx.sources.len(), "grounded prompt built");
                Ok((ctx.prompt, ctx.sources))
            }
            Err(e) => {
                warn!(error = %e, "retrieval failed, answering without documents");
                Ok((message.to_string(), Vec::new()))
            }
        }
    }
}
