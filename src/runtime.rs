//! Builds long-lived services from a [`Config`].

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use sovereign_rag_core::retrieval::{RetrievalEngine, RetrievalParams};
use sovereign_rag_core::store::memory::InMemoryStore;
use sovereign_rag_core::store::DocumentStore;

use crate::answer::Assistant;
use crate::config::{Config, StoreBackend};
use crate::db;
use crate::embedding::OllamaEmbedder;
use crate::error::Error;
use crate::sqlite_store::SqliteStore;

pub async fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("using in-memory document store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            info!(path = %config.db.path.display(), "using sqlite document store");
            let pool = db::open(&config.db.path).await?;
            Ok(Arc::new(SqliteStore::new(pool)))
        }
    }
}

pub async fn retrieval_engine(config: &Config) -> Result<RetrievalEngine> {
    let store = open_store(config).await?;
    let embedder = Arc::new(OllamaEmbedder::new(config)?);
    let r = &config.retrieval;
    Ok(RetrievalEngine::new(store, embedder).with_params(RetrievalParams {
        embed_char_limit: r.embed_char_limit,
        context_char_limit: r.context_char_limit,
        snippet_char_limit: r.snippet_char_limit,
    }))
}

pub async fn assistant(config: Arc<Config>) -> Result<Assistant> {
    let engine = retrieval_engine(&config).await?;
    Ok(Assistant::new(config, Some(engine)))
}

/// `engine` embedding through a per-request Ollama endpoint. Without an
/// override (or with a blank one) the engine is returned as configured.
pub fn engine_for_endpoint(
    engine: &RetrievalEngine,
    config: &Config,
    ollama_endpoint: Option<&str>,
) -> crate::error::Result<RetrievalEngine> {
    let Some(url) = ollama_endpoint.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(engine.clone());
    };
    let embedder = OllamaEmbedder::with_url(config, url)
        .map_err(|e| Error::configuration(format!("failed to build embedding client: {e:#}")))?;
    Ok(engine.with_embedder(Arc::new(embedder)))
}
