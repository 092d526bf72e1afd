//! Error taxonomy for the answer operation and its collaborators.
//!
//! Every failure surfaced to a caller is converted once, at the outermost
//! boundary, into a [`Failure`] via [`Error::to_failure`].

use serde::Serialize;
use sovereign_rag_core::embedding::EmbeddingError;
use sovereign_rag_core::retrieval::RetrievalError;

/// Longest endpoint string included in a [`Failure`].
pub const ENDPOINT_DISPLAY_LIMIT: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Configuration {
        message: String,
        /// The requested model, when the failure is tied to one.
        model: Option<String>,
    },

    #[error("Unknown model provider: {0}")]
    UnknownProvider(String),

    #[error("{model} at {endpoint}: {message}")]
    Provider {
        model: String,
        endpoint: String,
        message: String,
    },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("document store error: {0}")]
    Store(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{model} at {endpoint} timed out after {secs}s")]
    Timeout {
        model: String,
        endpoint: String,
        secs: u64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            model: None,
        }
    }

    pub fn provider(
        model: impl Into<String>,
        endpoint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Provider {
            model: model.into(),
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration { .. } => "configuration",
            Error::UnknownProvider(_) => "unknown_provider",
            Error::Provider { .. } => "provider",
            Error::Embedding(_) => "embedding",
            Error::Store(_) => "store",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Timeout { .. } => "timeout",
        }
    }

    pub fn to_failure(&self) -> Failure {
        let (message, model, endpoint) = match self {
            Error::Provider {
                model,
                endpoint,
                message,
            } => (message.clone(), Some(model.clone()), Some(endpoint.as_str())),
            Error::Timeout {
                model, endpoint, ..
            } => (self.to_string(), Some(model.clone()), Some(endpoint.as_str())),
            Error::Configuration { message, model } => (message.clone(), model.clone(), None),
            Error::UnknownProvider(raw) => (self.to_string(), Some(raw.clone()), None),
            other => (other.to_string(), None, None),
        };
        Failure {
            error: message,
            kind: self.kind(),
            model,
            endpoint: endpoint.map(truncate_endpoint),
        }
    }
}

impl From<RetrievalError> for Error {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Embedding(e) => Error::Embedding(e),
            RetrievalError::Store(msg) => Error::Store(msg),
        }
    }
}

/// Structured failure returned to callers in place of an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn truncate_endpoint(endpoint: &str) -> String {
    if endpoint.chars().count() <= ENDPOINT_DISPLAY_LIMIT {
        endpoint.to_string()
    } else {
        let head: String = endpoint.chars().take(ENDPOINT_DISPLAY_LIMIT).collect();
        format!("{head}...")
    }
}
