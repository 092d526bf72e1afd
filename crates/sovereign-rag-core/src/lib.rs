//! # Sovereign RAG Core
//!
//! Runtime-agnostic logic for Sovereign RAG: the conversation and document
//! data model, the [`store::DocumentStore`] abstraction, the
//! [`embedding::Embedder`] trait with cosine similarity, and the
//! [`retrieval::RetrievalEngine`] that ingests, ranks and contextualizes
//! documents.
//!
//! This crate performs no network or filesystem I/O of its own. Concrete
//! embedding clients and persistent stores live in the `sovereign-rag`
//! application crate.

pub mod embedding;
pub mod models;
pub mod retrieval;
pub mod store;
