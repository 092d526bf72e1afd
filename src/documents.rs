//! Upload validation for incoming documents.
//!
//! A file is accepted when its MIME type is in `upload.allowed_mime_types`
//! or its extension is in `upload.allowed_extensions` (case-insensitive),
//! it is not empty, and it does not exceed `upload.max_bytes`.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

use sovereign_rag_core::retrieval::NewDocument;

use crate::config::UploadConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub filename: String,
    pub content: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Ollama base URL to embed with instead of the configured one.
    #[serde(default)]
    pub ollama_endpoint: Option<String>,
}

impl UploadRequest {
    /// Read a local UTF-8 file into an upload.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        Ok(Self {
            filename,
            content,
            mime_type: None,
            ollama_endpoint: None,
        })
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Best-effort MIME type from the file extension.
pub fn infer_mime_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("py") => "text/x-python",
        Some("js" | "jsx") => "text/javascript",
        Some("ts" | "tsx") => "text/typescript",
        _ => "text/plain",
    }
}

/// Check an upload against the configured limits and turn it into ingest input.
pub fn validate_upload(req: UploadRequest, config: &UploadConfig) -> Result<NewDocument> {
    let filename = req.filename.trim().to_string();
    if filename.is_empty() {
        return Err(Error::InvalidRequest("filename must not be empty".into()));
    }
    if req.content.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("{filename} is empty")));
    }

    let size = req.content.len();
    if size > config.max_bytes {
        return Err(Error::InvalidRequest(format!(
            "{filename} is {size} bytes, maximum is {} bytes",
            config.max_bytes
        )));
    }

    let mime_type = req
        .mime_type
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| infer_mime_type(&filename).to_string());

    let type_allowed = config.allowed_mime_types.iter().any(|m| *m == mime_type);
    let ext_allowed = extension(&filename)
        .map(|ext| {
            config
                .allowed_extensions
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false);

    if !type_allowed && !ext_allowed {
        return Err(Error::InvalidRequest(format!(
            "unsupported file type for {filename} ({mime_type})"
        )));
    }

    Ok(NewDocument {
        filename,
        content: req.content,
        mime_type,
        size: Some(size as u64),
    })
}
