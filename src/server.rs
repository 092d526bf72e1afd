//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version, document count) |
//! | `POST` | `/chat` | Answer a message in chat, workers or ralph mode |
//! | `POST` | `/documents` | Upload and index a text document |
//! | `GET`  | `/documents` | List documents, or search with `?q=<query>&limit=<k>` |
//!
//! Upload bodies and search queries accept `ollamaEndpoint` to embed through
//! a different Ollama instance for that request.
//! | `GET`  | `/documents/{id}` | Fetch one document |
//! | `DELETE` | `/documents/{id}` | Delete a document |
//!
//! `POST /chat` with `"stream": true` (chat mode) answers with
//! `application/x-ndjson`: a `sources` line, `chunk` lines as text arrives,
//! then `done` or an `error` line.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "provider", "message": "HTTP 500: ...", "model": "ollama/llama3.2", "endpoint": "http://localhost:11434" } }
//! ```
//!
//! Codes: `bad_request` (400), `configuration` (400), `unknown_provider` (400),
//! `not_found` (404), `provider` (502), `embedding` (502), `timeout` (504),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser chat UI can
//! call the server directly.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use sovereign_rag_core::models::{Document, Source};
use sovereign_rag_core::retrieval::RetrievalEngine;

use crate::answer::{AnswerRequest, AnswerResponse, Assistant};
use crate::config::Config;
use crate::documents::{validate_upload, UploadRequest};
use crate::error::Error;
use crate::providers::TextStream;
use crate::runtime;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    assistant: Assistant,
    engine: RetrievalEngine,
}

impl AppState {
    pub fn new(config: Arc<Config>, engine: RetrievalEngine) -> Self {
        Self {
            assistant: Assistant::new(config.clone(), Some(engine.clone())),
            config,
            engine,
        }
    }
}

/// Build the router with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", axum::routing::post(handle_chat))
        .route("/documents", get(handle_list_documents).post(handle_upload))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());
    let engine = runtime::retrieval_engine(&config).await?;
    let app = router(AppState::new(config.clone(), engine));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
}

struct AppError {
    status: StatusCode,
    detail: ErrorDetail,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.detail })).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        detail: ErrorDetail {
            code: "bad_request".to_string(),
            message: message.into(),
            model: None,
            endpoint: None,
        },
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        detail: ErrorDetail {
            code: "not_found".to_string(),
            message: message.into(),
            model: None,
            endpoint: None,
        },
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::Configuration { .. } => (StatusCode::BAD_REQUEST, "configuration"),
            Error::UnknownProvider(_) => (StatusCode::BAD_REQUEST, "unknown_provider"),
            Error::Provider { .. } => (StatusCode::BAD_GATEWAY, "provider"),
            Error::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding"),
            Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            warn!(kind = err.kind(), error = %err, "request failed");
        }
        let failure = err.to_failure();
        AppError {
            status,
            detail: ErrorDetail {
                code: code.to_string(),
                message: failure.error,
                model: failure.model,
                endpoint: failure.endpoint,
            },
        }
    }
}

impl From<sovereign_rag_core::retrieval::RetrievalError> for AppError {
    fn from(err: sovereign_rag_core::retrieval::RetrievalError) -> Self {
        Error::from(err).into()
    }
}

// ============ Response shapes ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSummary {
    id: String,
    filename: String,
    size: u64,
    mime_type: String,
    uploaded_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            filename: doc.filename.clone(),
            size: doc.metadata.size,
            mime_type: doc.metadata.mime_type.clone(),
            uploaded_at: doc.metadata.uploaded_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentView {
    #[serde(flatten)]
    summary: DocumentSummary,
    content: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum DocumentListing {
    All { documents: Vec<DocumentSummary> },
    Search { query: String, results: Vec<Source> },
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    documents: usize,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        documents: state.engine.count().await?,
    }))
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> Result<Response, AppError> {
    if req.stream {
        let (rx, sources) = state.assistant.answer_stream(req).await?;
        return Ok(ndjson_response(rx, sources));
    }
    let response: AnswerResponse = state.assistant.answer(req).await?;
    Ok(Json(response).into_response())
}

/// `{"sources": [...]}`, then one `{"chunk": "..."}` line per text chunk,
/// closed by `{"done": true}` or by a single `{"error": {...}}` line.
fn ndjson_response(rx: TextStream, sources: Vec<Source>) -> Response {
    let head = ndjson_line(&serde_json::json!({ "sources": sources }));
    let chunks = futures::stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Ok(text)) => Some((ndjson_line(&serde_json::json!({ "chunk": text })), Some(rx))),
            Some(Err(e)) => {
                warn!(kind = e.kind(), error = %e, "stream failed");
                let line = ndjson_line(&serde_json::json!({ "error": e.to_failure() }));
                Some((line, None))
            }
            None => Some((ndjson_line(&serde_json::json!({ "done": true })), None)),
        }
    });
    let body = futures::stream::iter([head])
        .chain(chunks)
        .map(Ok::<_, Infallible>);

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}

fn ndjson_line(value: &serde_json::Value) -> String {
    format!("{value}\n")
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<DocumentSummary>), AppError> {
    let engine =
        runtime::engine_for_endpoint(&state.engine, &state.config, req.ollama_endpoint.as_deref())?;
    let new_doc = validate_upload(req, &state.config.upload)?;
    let doc = engine.ingest(new_doc).await?;
    info!(id = %doc.id, size = doc.metadata.size, "document uploaded");
    Ok((StatusCode::CREATED, Json(DocumentSummary::from(&doc))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    q: Option<String>,
    limit: Option<usize>,
    ollama_endpoint: Option<String>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentListing>, AppError> {
    match params.q.filter(|q| !q.trim().is_empty()) {
        Some(query) => {
            let limit = params
                .limit
                .unwrap_or(state.config.retrieval.default_limit);
            if limit == 0 {
                return Err(bad_request("limit must be >= 1"));
            }
            let engine = runtime::engine_for_endpoint(
                &state.engine,
                &state.config,
                params.ollama_endpoint.as_deref(),
            )?;
            let results = engine.search(&query, limit).await?;
            let sources = engine.contextualize(&query, &results).sources;
            Ok(Json(DocumentListing::Search {
                query,
                results: sources,
            }))
        }
        None => {
            let docs = state.engine.list().await?;
            Ok(Json(DocumentListing::All {
                documents: docs.iter().map(DocumentSummary::from).collect(),
            }))
        }
    }
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, AppError> {
    let doc = state
        .engine
        .get(&id)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;
    Ok(Json(DocumentView {
        summary: DocumentSummary::from(&doc),
        content: doc.content,
    }))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.engine.delete(&id).await? {
        return Err(not_found(format!("document not found: {}", id)));
    }
    info!(id = %id, "document deleted");
    Ok(Json(serde_json::json!({ "deleted": true, "id": id })))
}
