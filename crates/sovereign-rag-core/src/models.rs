//! Core data models shared by the orchestration and retrieval layers.
//!
//! Conversations are ordered sequences of [`Message`]s; every provider call
//! produces exactly one [`GenerationResult`]. Ingested files become
//! [`Document`]s owned by a [`DocumentStore`](crate::store::DocumentStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn. Order within a conversation is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Normalized token accounting across providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Sum usage over several results, `None` when no result reported any.
    pub fn sum<'a, I>(items: I) -> Option<Usage>
    where
        I: IntoIterator<Item = &'a Option<Usage>>,
    {
        items
            .into_iter()
            .flatten()
            .fold(None, |acc: Option<Usage>, u| {
                let mut total = acc.unwrap_or_default();
                total.prompt_tokens += u.prompt_tokens;
                total.completion_tokens += u.completion_tokens;
                total.total_tokens += u.total_tokens;
                Some(total)
            })
    }
}

/// Output of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub content: String,
    /// Full namespaced model identifier, e.g. `"ollama/llama3.2"`.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// File-level metadata recorded at ingest time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    /// Size of the uploaded file in bytes.
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A stored document. Immutable after ingest except for deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content: String,
    /// Present once indexing completed; documents without one are never
    /// returned by search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: DocumentMetadata,
}

/// A scored document returned by [`RetrievalEngine::search`](crate::retrieval::RetrievalEngine::search).
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Citation shown to the end user next to a grounded answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub document_id: String,
    pub filename: String,
    pub snippet: String,
    pub score: f32,
}
