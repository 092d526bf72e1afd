//! # Sovereign RAG CLI (`srag`)
//!
//! ## Usage
//!
//! ```bash
//! srag --config ./config/srag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag serve` | Start the HTTP server |
//! | `srag ingest <file>` | Upload and index a local text file |
//! | `srag search "<query>"` | Rank indexed documents against a query |
//! | `srag documents list` | List indexed documents |
//! | `srag documents get <id>` | Print one document |
//! | `srag documents delete <id>` | Delete a document |
//! | `srag ask "<message>"` | Answer a message (chat, workers or ralph mode) |
//!
//! ## Examples
//!
//! ```bash
//! srag ingest ./notes/architecture.md
//! srag ask "Summarize the architecture notes" --rag
//! srag ask "Write a haiku about Rust" --mode workers \
//!     --worker ollama/llama3.2 --worker openai/gpt-4o-mini
//! srag ask "Draft a release announcement" --mode ralph --iterations 4
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sovereign_rag::answer::{AnswerRequest, Mode};
use sovereign_rag::config::{self, Config};
use sovereign_rag::documents::{validate_upload, UploadRequest};
use sovereign_rag::error::Error;
use sovereign_rag::{logging, runtime, server};

const DEFAULT_CONFIG: &str = "./config/srag.toml";

/// Sovereign RAG: multi-model chat orchestration grounded in your own documents.
#[derive(Parser)]
#[command(name = "srag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/srag.toml`; built-in defaults apply when that
    /// file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Upload and index a local text file.
    Ingest {
        file: PathBuf,
    },

    /// Rank indexed documents by similarity to a query.
    Search {
        query: String,

        /// Maximum number of results (default: `[retrieval].default_limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Inspect or remove indexed documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Answer a message.
    Ask {
        message: String,

        /// Namespaced chat model, e.g. `ollama/llama3.2` or `openai/gpt-4o`.
        #[arg(long)]
        model: Option<String>,

        /// `chat`, `workers` or `ralph`.
        #[arg(long, default_value = "chat")]
        mode: String,

        /// Worker model for workers mode (repeatable).
        #[arg(long = "worker")]
        workers: Vec<String>,

        /// Ralph loop iterations (1-10).
        #[arg(long)]
        iterations: Option<u32>,

        /// Ground the answer in indexed documents.
        #[arg(long)]
        rag: bool,

        /// Print the answer as it is generated (chat mode only).
        #[arg(long)]
        stream: bool,

        /// Print the full response as JSON.
        #[arg(long, conflicts_with = "stream")]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DocumentsAction {
    List,
    Get { id: String },
    Delete { id: String },
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => {
            let mut config = Config::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { file } => {
            let upload = UploadRequest::from_path(&file)?;
            let new_doc = validate_upload(upload, &cfg.upload)?;
            let engine = runtime::retrieval_engine(&cfg).await?;
            let doc = engine.ingest(new_doc).await.map_err(Error::from)?;
            println!("indexed {} ({} bytes)", doc.id, doc.metadata.size);
        }
        Commands::Search { query, limit } => {
            let engine = runtime::retrieval_engine(&cfg).await?;
            let k = limit.unwrap_or(cfg.retrieval.default_limit);
            let results = engine.search(&query, k).await.map_err(Error::from)?;
            if results.is_empty() {
                println!("No results.");
            }
            for source in engine.contextualize(&query, &results).sources {
                println!("{:.4}  {}  {}", source.score, source.document_id, source.filename);
                println!("        {}", source.snippet.replace('\n', " "));
            }
        }
        Commands::Documents { action } => {
            let engine = runtime::retrieval_engine(&cfg).await?;
            match action {
                DocumentsAction::List => {
                    let docs = engine.list().await.map_err(Error::from)?;
                    if docs.is_empty() {
                        println!("No documents.");
                    }
                    for doc in docs {
                        println!(
                            "{}  {}  {} bytes  {}",
                            doc.id,
                            doc.metadata.mime_type,
                            doc.metadata.size,
                            doc.metadata.uploaded_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                DocumentsAction::Get { id } => {
                    let doc = engine
                        .get(&id)
                        .await
                        .map_err(Error::from)?
                        .with_context(|| format!("document not found: {}", id))?;
                    println!("id:       {}", doc.id);
                    println!("filename: {}", doc.filename);
                    println!("type:     {}", doc.metadata.mime_type);
                    println!("size:     {} bytes", doc.metadata.size);
                    println!();
                    println!("{}", doc.content);
                }
                DocumentsAction::Delete { id } => {
                    if !engine.delete(&id).await.map_err(Error::from)? {
                        anyhow::bail!("document not found: {}", id);
                    }
                    println!("deleted {}", id);
                }
            }
        }
        Commands::Ask {
            message,
            model,
            mode,
            workers,
            iterations,
            rag,
            stream,
            json,
        } => {
            let req = AnswerRequest {
                message,
                model,
                mode: mode.parse::<Mode>()?,
                worker_models: workers,
                ralph_iterations: iterations,
                use_rag: rag,
                ..AnswerRequest::default()
            };
            let assistant = runtime::assistant(Arc::new(cfg)).await?;

            if stream {
                let (mut rx, sources) = assistant.answer_stream(req).await.map_err(report)?;
                let mut stdout = std::io::stdout();
                while let Some(chunk) = rx.recv().await {
                    write!(stdout, "{}", chunk.map_err(report)?)?;
                    stdout.flush()?;
                }
                println!();
                print_sources(&sources);
                return Ok(());
            }

            let response = assistant.answer(req).await.map_err(report)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            if let Some(results) = &response.worker_results {
                for result in results.iter().skip(1) {
                    println!("--- {} ---\n{}\n", result.model, result.content);
                }
                println!("--- {} ---", response.model);
            }
            println!("{}", response.answer);
            print_sources(&response.sources);
        }
    }

    Ok(())
}

/// Print the structured failure to stderr, keeping the error for the exit code.
fn report(err: Error) -> anyhow::Error {
    if let Ok(json) = serde_json::to_string(&err.to_failure()) {
        eprintln!("{}", json);
    }
    err.into()
}

fn print_sources(sources: &[sovereign_rag_core::models::Source]) {
    if sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for (i, s) in sources.iter().enumerate() {
        println!("  [{}] {} ({:.3})", i + 1, s.filename, s.score);
    }
}
