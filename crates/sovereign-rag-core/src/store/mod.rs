//! Storage abstraction for Sovereign RAG.
//!
//! The [`DocumentStore`] trait is deliberately key-value shaped: documents are
//! put, fetched and deleted by id, and a named set enumerates the ids that
//! are visible to search. This mirrors the small surface a KV backend offers
//! and is all the retrieval engine needs.
//!
//! Implementations must be `Send + Sync` to be shared across async tasks.
//!
//! # Visibility ordering
//!
//! Writers call [`put`](DocumentStore::put) before
//! [`add_to_set`](DocumentStore::add_to_set), and
//! [`remove_from_set`](DocumentStore::remove_from_set) before
//! [`delete`](DocumentStore::delete). A reader enumerating the set therefore
//! never observes an id whose document body is not fully stored.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Document;

/// Name of the set that indexes every searchable document.
pub const DOCUMENT_SET: &str = "documents:all";

/// Abstract document storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put`](DocumentStore::put) | Store a document body under its id |
/// | [`get`](DocumentStore::get) | Fetch a document by id |
/// | [`delete`](DocumentStore::delete) | Remove a document body |
/// | [`add_to_set`](DocumentStore::add_to_set) | Add an id to a named set |
/// | [`remove_from_set`](DocumentStore::remove_from_set) | Remove an id from a named set |
/// | [`members`](DocumentStore::members) | Enumerate a set in insertion order |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store (or overwrite) a document keyed by `doc.id`.
    async fn put(&self, doc: &Document) -> Result<()>;

    /// Fetch a copy of the document with the given id.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Delete the document body. Returns `true` if it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Add `id` to `set`. Adding an existing member is a no-op.
    async fn add_to_set(&self, set: &str, id: &str) -> Result<()>;

    /// Remove `id` from `set`. Returns `true` if it was a member.
    async fn remove_from_set(&self, set: &str, id: &str) -> Result<bool>;

    /// All members of `set`, oldest first.
    async fn members(&self, set: &str) -> Result<Vec<String>>;
}
