//! Retrieval engine: ingest, similarity search, and context assembly.
//!
//! The engine operates entirely through the [`DocumentStore`] and
//! [`Embedder`] traits, so the same algorithm runs against SQLite in the
//! server and against [`InMemoryStore`](crate::store::memory::InMemoryStore)
//! in tests.
//!
//! # Search algorithm
//!
//! 1. Enumerate [`DOCUMENT_SET`]. If empty, return no results without
//!    calling the embedder.
//! 2. Embed the query once.
//! 3. Score every indexed document that carries an embedding by cosine
//!    similarity. Pairs with an undefined similarity (zero norm, length
//!    mismatch) are excluded.
//! 4. Stable sort by descending score, so ties keep insertion order.
//! 5. Truncate to `k`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::embedding::{cosine_similarity, truncate_chars, Embedder, EmbeddingError};
use crate::models::{Document, DocumentMetadata, SearchResult, Source};
use crate::store::{DocumentStore, DOCUMENT_SET};

/// Character caps applied during ingest and context assembly.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Only this many leading characters of a document are embedded.
    pub embed_char_limit: usize,
    /// Per-document cap for text injected into the prompt.
    pub context_char_limit: usize,
    /// Per-document cap for the citation snippet shown to the user.
    pub snippet_char_limit: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            embed_char_limit: 5000,
            context_char_limit: 1000,
            snippet_char_limit: 200,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("document store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for RetrievalError {
    fn from(err: anyhow::Error) -> Self {
        RetrievalError::Store(format!("{:#}", err))
    }
}

/// Raw input for [`RetrievalEngine::ingest`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub content: String,
    pub mime_type: String,
    /// Original file size in bytes; defaults to the UTF-8 length of `content`.
    pub size: Option<u64>,
}

/// Prompt text with retrieved context plus the citations backing it.
#[derive(Debug, Clone)]
pub struct Contextualized {
    /// The string forwarded to generation in place of the raw query.
    pub prompt: String,
    pub sources: Vec<Source>,
}

/// Build a unique document id from the upload time and filename.
///
/// A random suffix keeps ids distinct when the same file is ingested twice
/// within one millisecond.
pub fn generate_document_id(filename: &str, now: DateTime<Utc>) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("doc:{}:{}:{}", now.timestamp_millis(), &nonce[..8], filename)
}

/// Embeds, stores and ranks documents.
#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    params: RetrievalParams,
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            params: RetrievalParams::default(),
        }
    }

    pub fn with_params(mut self, params: RetrievalParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// A view over the same store that embeds with `embedder` instead.
    pub fn with_embedder(&self, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store: self.store.clone(),
            embedder,
            params: self.params.clone(),
        }
    }

    /// Embed and persist a document, then make it visible to search.
    ///
    /// Nothing is written if the embedding call fails.
    pub async fn ingest(&self, new: NewDocument) -> Result<Document, RetrievalError> {
        let prefix = truncate_chars(&new.content, self.params.embed_char_limit);
        let embedding = self.embedder.embed(prefix).await?;
        if embedding.is_empty() {
            return Err(EmbeddingError::Malformed("empty embedding vector".to_string()).into());
        }
        if let Some(expected) = self.embedder.dims() {
            if embedding.len() != expected {
                return Err(EmbeddingError::Dimensions {
                    expected,
                    actual: embedding.len(),
                }
                .into());
            }
        }

        let now = Utc::now();
        let size = new.size.unwrap_or(new.content.len() as u64);
        let doc = Document {
            id: generate_document_id(&new.filename, now),
            filename: new.filename,
            content: new.content,
            embedding: Some(embedding),
            metadata: DocumentMetadata {
                size,
                mime_type: new.mime_type,
                uploaded_at: now,
            },
        };

        self.store.put(&doc).await?;
        self.store.add_to_set(DOCUMENT_SET, &doc.id).await?;
        debug!(id = %doc.id, dims = doc.embedding.as_ref().map_or(0, Vec::len), "document indexed");

        Ok(doc)
    }

    /// Return at most `k` documents ranked by similarity to `query`.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, RetrievalError> {
        let ids = self.store.members(DOCUMENT_SET).await?;
        if ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query).await?;

        let mut results = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(doc) = self.store.get(id).await? else {
                continue;
            };
            let Some(score) = doc
                .embedding
                .as_deref()
                .and_then(|emb| cosine_similarity(&query_vec, emb))
            else {
                continue;
            };
            results.push(SearchResult {
                document: doc,
                score,
            });
        }

        // `sort_by` is stable: equal scores keep insertion order.
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);

        debug!(indexed = ids.len(), returned = results.len(), "search complete");
        Ok(results)
    }

    /// Build the grounded prompt and citation list for `query`.
    pub fn contextualize(&self, query: &str, results: &[SearchResult]) -> Contextualized {
        contextualize(query, results, &self.params)
    }

    /// Remove a document from the index and the store.
    pub async fn delete(&self, id: &str) -> Result<bool, RetrievalError> {
        let was_member = self.store.remove_from_set(DOCUMENT_SET, id).await?;
        let existed = self.store.delete(id).await?;
        Ok(was_member || existed)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>, RetrievalError> {
        Ok(self.store.get(id).await?)
    }

    /// All indexed documents, oldest first.
    pub async fn list(&self) -> Result<Vec<Document>, RetrievalError> {
        let ids = self.store.members(DOCUMENT_SET).await?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(doc) = self.store.get(id).await? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    pub async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.store.members(DOCUMENT_SET).await?.len())
    }
}

/// Concatenate search results into a labelled context block.
///
/// With no results the prompt is the query unchanged.
pub fn contextualize(query: &str, results: &[SearchResult], params: &RetrievalParams) -> Contextualized {
    if results.is_empty() {
        return Contextualized {
            prompt: query.to_string(),
            sources: Vec::new(),
        };
    }

    let blocks: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[Document {}: {}]\n{}",
                i + 1,
                r.document.filename,
                truncate_chars(&r.document.content, params.context_char_limit)
            )
        })
        .collect();

    let sources = results
        .iter()
        .map(|r| Source {
            document_id: r.document.id.clone(),
            filename: r.document.filename.clone(),
            snippet: truncate_chars(&r.document.content, params.snippet_char_limit).to_string(),
            score: r.score,
        })
        .collect();

    Contextualized {
        prompt: format!(
            "Context from uploaded documents:\n\n{}\n\nUser question: {}",
            blocks.join("\n\n"),
            query
        ),
        sources,
    }
}
