//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! the [`EmbeddingError`] it fails with, and the cosine similarity used for
//! ranking.
//!
//! Concrete clients (the Ollama HTTP embedder) live in the `sovereign-rag`
//! app crate.

use async_trait::async_trait;

/// Failure of an embedding backend call.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding backend unreachable at {endpoint}: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("embedding backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    Malformed(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },
}

/// Turns text into a fixed-length vector.
///
/// One backend is configured at a time, so every vector produced by an
/// embedder has the same dimensionality.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Expected dimensionality, when known up front.
    fn dims(&self) -> Option<usize> {
        None
    }

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `None` when the similarity is undefined: empty vectors, vectors
/// of different lengths, or a vector with zero norm. Callers exclude such
/// pairs from ranking instead of scoring them.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    score.is_finite().then_some(score)
}

/// Encode a float vector as a little-endian BLOB for SQLite storage.
///
/// ```
/// use sovereign_rag_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Take at most `limit` characters (not bytes) from the start of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
