//! # Sovereign RAG
//!
//! Local-first chat orchestration across LLM backends, optionally grounded
//! in a private document corpus.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   request ─────▶│  Assistant   │────────────────────────┐
//!                 └──────┬───────┘                        │
//!            use_rag     │                                ▼
//!        ┌───────────────┘                       ┌────────────────┐
//!        ▼                                       │  Orchestrator  │
//! ┌──────────────┐   ┌──────────┐                │ chat / workers │
//! │  Retrieval   │──▶│ Embedder │ (Ollama)       │ / ralph loop   │
//! │   Engine     │   └──────────┘                └───────┬────────┘
//! │              │──▶ DocumentStore (SQLite/mem)         ▼
//! └──────────────┘                           Provider (Ollama/Anthropic/OpenAI)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Error taxonomy and structured failures |
//! | [`providers`] | Provider trait, model ids, factory, backend adapters |
//! | [`orchestrator`] | Chat, workers fan-out, ralph loop |
//! | [`answer`] | The "answer this" operation |
//! | [`embedding`] | Ollama embedding client |
//! | [`documents`] | Upload validation |
//! | [`db`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite document store |
//! | [`runtime`] | Service construction from config |
//! | [`server`] | HTTP server |
//!
//! Retrieval itself (data model, cosine ranking, context assembly) lives in
//! the `sovereign-rag-core` crate.

pub mod answer;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod runtime;
pub mod server;
pub mod sqlite_store;
