use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

use sovereign_rag::config::Config;
use sovereign_rag::server;

// ─── Mock backend ───────────────────────────────────────────────────

const VOCAB: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "quantum", "mechanics", "lecture", "notes", "rust",
    "cargo", "outage",
];

/// Bag-of-words vector over a fixed vocabulary.
fn embed_text(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; VOCAB.len()];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if let Some(i) = VOCAB.iter().position(|w| *w == word) {
            v[i] += 1.0;
        }
    }
    v
}

async fn mock_embeddings(Json(body): Json<Value>) -> Response {
    let prompt = body["prompt"].as_str().unwrap_or_default();
    if prompt.contains("outage") {
        return (StatusCode::SERVICE_UNAVAILABLE, "embedding model offline").into_response();
    }
    Json(json!({ "embedding": embed_text(prompt) })).into_response()
}

async fn mock_generate(Json(body): Json<Value>) -> Response {
    let model = body["model"].as_str().unwrap_or_default();
    let prompt = body["prompt"].as_str().unwrap_or_default();
    if model == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
    }
    let text = format!("ollama:{model}:{prompt}");
    if body["stream"] == true {
        let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
        let lines = [
            json!({ "response": &text[..mid], "done": false }),
            json!({ "response": &text[mid..], "done": false }),
            json!({ "response": "", "done": true }),
        ];
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        return body.into_response();
    }
    Json(json!({ "response": text, "prompt_eval_count": 2, "eval_count": 3 })).into_response()
}

fn last_content(body: &Value) -> String {
    body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

async fn mock_anthropic(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("ant-test") {
        return (StatusCode::UNAUTHORIZED, "invalid x-api-key").into_response();
    }
    let model = body["model"].as_str().unwrap_or_default();
    Json(json!({
        "content": [{ "type": "text", "text": format!("anthropic:{model}:{}", last_content(&body)) }],
        "usage": { "input_tokens": 5, "output_tokens": 7 }
    }))
    .into_response()
}

async fn mock_openai(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    let model = body["model"].as_str().unwrap_or_default();
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": format!("openai:{model}:{}", last_content(&body)) } }],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
    }))
    .into_response()
}

async fn spawn_mock_backend() -> String {
    let router = Router::new()
        .route("/api/embeddings", post(mock_embeddings))
        .route("/api/generate", post(mock_generate))
        .route("/v1/messages", post(mock_anthropic))
        .route("/v1/chat/completions", post(mock_openai));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

// ─── Server harness ─────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn test_config(tmp: &TempDir, mock: &str) -> Config {
    let mut cfg = Config::default();
    cfg.db.path = tmp.path().join("data/srag.sqlite");
    cfg.embedding.url = Some(mock.to_string());
    cfg.embedding.max_retries = 0;
    cfg.providers.ollama_endpoint = Some(mock.to_string());
    cfg.providers.anthropic_base_url = mock.to_string();
    cfg.providers.openai_base_url = mock.to_string();
    cfg
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    mock: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut Config)) -> Self {
        let mock = spawn_mock_backend().await;
        let tmp = TempDir::new().unwrap();
        let port = find_free_port();
        let mut cfg = test_config(&tmp, &mock);
        cfg.server.bind = format!("127.0.0.1:{}", port);
        configure(&mut cfg);

        tokio::spawn(async move {
            server::run_server(&cfg).await.unwrap();
        });
        wait_for_server(port).await;

        Self {
            _tmp: tmp,
            base: format!("http://127.0.0.1:{}", port),
            mock,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    async fn upload(&self, filename: &str, content: &str) -> String {
        let (status, body) = self
            .post("/documents", json!({ "filename": filename, "content": content }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "upload failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }
}

// ─── Documents ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let srv = TestServer::start().await;
    let (status, body) = srv.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["documents"], 0);
}

#[tokio::test]
async fn test_upload_search_get_delete() {
    let srv = TestServer::start().await;
    let fox = srv.upload("fox.txt", "The quick brown fox").await;
    let physics = srv
        .upload("physics.md", "Quantum mechanics lecture notes")
        .await;
    assert!(fox.starts_with("doc:"));
    assert!(fox.ends_with(":fox.txt"));

    let (status, body) = srv.get("/documents?q=fox%20jumps&limit=5").await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["documentId"], fox.as_str());
    assert_eq!(results[1]["documentId"], physics.as_str());
    assert!(results[0]["score"].as_f64().unwrap() > results[1]["score"].as_f64().unwrap());

    let (_, body) = srv.get("/documents?q=fox&limit=1").await;
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let (_, body) = srv.get("/documents").await;
    let names: Vec<&str> = body["documents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["fox.txt", "physics.md"]);

    let (status, body) = srv.get(&format!("/documents/{}", fox)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "The quick brown fox");
    assert_eq!(body["mimeType"], "text/plain");
    assert!(body.get("embedding").is_none());

    let resp = srv
        .client
        .delete(format!("{}/documents/{}", srv.base, fox))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (status, body) = srv.get(&format!("/documents/{}", fox)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (_, body) = srv.get("/documents?q=fox").await;
    let results = body["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["documentId"] != fox.as_str()));
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/documents",
            json!({ "filename": "photo.png", "content": "x", "mimeType": "image/png" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_delete_missing_document() {
    let srv = TestServer::start().await;
    let resp = srv
        .client
        .delete(format!("{}/documents/doc:0:nope", srv.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_mode_echoes_model() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post("/chat", json!({ "message": "hello", "model": "ollama/llama3.2" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answer"], "ollama:llama3.2:user: hello");
    assert_eq!(body["model"], "ollama/llama3.2");
    assert_eq!(body["models"], json!(["ollama/llama3.2"]));
    assert_eq!(body["usage"]["totalTokens"], 5);
    assert_eq!(body["sources"], json!([]));
}

#[tokio::test]
async fn test_chat_with_retrieval_cites_sources() {
    let srv = TestServer::start().await;
    srv.upload("fox.txt", "The quick brown fox").await;
    srv.upload("physics.md", "Quantum mechanics lecture notes").await;

    let (status, body) = srv
        .post(
            "/chat",
            json!({ "message": "what does the fox do?", "model": "ollama/llama3.2", "useRag": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let answer = body["answer"].as_str().unwrap();
    assert!(answer.contains("Context from uploaded documents:"));
    assert!(answer.contains("[Document 1: fox.txt]"));
    assert!(answer.contains("User question: what does the fox do?"));
    assert_eq!(body["sources"][0]["filename"], "fox.txt");
    assert_eq!(body["sources"][0]["snippet"], "The quick brown fox");
}

#[tokio::test]
async fn test_retrieval_failure_answers_ungrounded() {
    let srv = TestServer::start().await;
    srv.upload("fox.txt", "The quick brown fox").await;

    let (status, body) = srv
        .post(
            "/chat",
            json!({ "message": "outage fox", "model": "ollama/llama3.2", "useRag": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answer"], "ollama:llama3.2:user: outage fox");
    assert_eq!(body["sources"], json!([]));
}

#[tokio::test]
async fn test_request_ollama_endpoint_reaches_retrieval() {
    let dead = format!("http://127.0.0.1:{}", find_free_port());
    let srv = TestServer::start_with(|cfg| {
        cfg.embedding.url = Some(dead.clone());
        cfg.providers.ollama_endpoint = Some(dead.clone());
    })
    .await;

    let (status, body) = srv
        .post("/documents", json!({ "filename": "fox.txt", "content": "The quick brown fox" }))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["error"]["code"], "embedding");

    let (status, body) = srv
        .post(
            "/documents",
            json!({ "filename": "fox.txt", "content": "The quick brown fox", "ollamaEndpoint": srv.mock }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let fox = body["id"].as_str().unwrap().to_string();

    let resp = srv
        .client
        .get(format!("{}/documents", srv.base))
        .query(&[("q", "fox"), ("ollamaEndpoint", srv.mock.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["results"][0]["documentId"], fox.as_str());

    let (status, body) = srv
        .post(
            "/chat",
            json!({
                "message": "what does the fox do?",
                "model": "ollama/llama3.2",
                "useRag": true,
                "ollamaEndpoint": srv.mock
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["sources"][0]["documentId"], fox.as_str());
    assert!(body["answer"].as_str().unwrap().contains("[Document 1: fox.txt]"));
}

#[tokio::test]
async fn test_chat_stream_emits_ndjson() {
    let srv = TestServer::start().await;
    srv.upload("fox.txt", "The quick brown fox").await;

    let resp = srv
        .client
        .post(format!("{}/chat", srv.base))
        .json(&json!({ "message": "fox", "model": "ollama/llama3.2", "useRag": true, "stream": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/x-ndjson"
    );

    let text = resp.text().await.unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.first().unwrap()["sources"][0]["filename"], "fox.txt");
    assert_eq!(lines.last().unwrap()["done"], true);

    let answer: String = lines
        .iter()
        .filter_map(|l| l["chunk"].as_str())
        .collect();
    assert!(answer.starts_with("ollama:llama3.2:user: Context from uploaded documents:"));
    assert!(answer.ends_with("User question: fox"));
}

#[tokio::test]
async fn test_chat_stream_rejects_other_modes() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/chat",
            json!({ "message": "draft", "model": "ollama/llama3.2", "mode": "ralph", "stream": true }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_workers_mode_across_providers() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/chat",
            json!({
                "message": "name a color",
                "model": "ollama/llama3.2",
                "mode": "workers",
                "workerModels": ["openai/gpt-4o-mini", "ollama/llama3.2", "anthropic/claude-3-haiku"],
                "anthropicApiKey": "ant-test",
                "openaiApiKey": "sk-test"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(
        body["models"],
        json!(["openai/gpt-4o-mini", "ollama/llama3.2", "anthropic/claude-3-haiku"])
    );
    assert_eq!(body["model"], "openai/gpt-4o-mini");
    assert_eq!(body["answer"], "openai:gpt-4o-mini:name a color");
    let workers = body["workerResults"].as_array().unwrap();
    assert_eq!(workers.len(), 3);
    assert_eq!(
        workers[1]["content"],
        "ollama:llama3.2:system: You are a specialized worker agent.\n\nuser: name a color"
    );
    assert_eq!(workers[2]["content"], "anthropic:claude-3-haiku:name a color");
    // 2 (openai) + 5 (ollama) + 12 (anthropic)
    assert_eq!(body["usage"]["totalTokens"], 19);
}

#[tokio::test]
async fn test_worker_failure_fails_request() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/chat",
            json!({
                "message": "hi",
                "model": "ollama/llama3.2",
                "mode": "workers",
                "workerModels": ["ollama/llama3.2", "ollama/broken"]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "provider");
    assert_eq!(body["error"]["model"], "ollama/broken");
    assert!(body["error"]["endpoint"].as_str().unwrap().starts_with("http://127.0.0.1"));
}

#[tokio::test]
async fn test_ralph_mode_refines_previous_output() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/chat",
            json!({
                "message": "draft",
                "model": "ollama/llama3.2",
                "mode": "ralph",
                "ralphIterations": 3
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let iterations = body["iterations"].as_array().unwrap();
    assert_eq!(iterations.len(), 3);
    for i in 1..3 {
        let previous = iterations[i - 1]["content"].as_str().unwrap();
        let current = iterations[i]["content"].as_str().unwrap();
        assert!(current.contains(&format!("Previous iteration result: {previous}")));
    }
    assert_eq!(body["answer"], iterations[2]["content"]);
    assert_eq!(body["usage"]["totalTokens"], 15);
}

#[tokio::test]
async fn test_unconfigured_key_is_configuration_error() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post("/chat", json!({ "message": "hi", "model": "openai/gpt-4o" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "configuration");
    assert_eq!(body["error"]["message"], "OpenAI API key not configured");
    assert_eq!(body["error"]["model"], "openai/gpt-4o");
}

#[tokio::test]
async fn test_unknown_provider_rejected() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post("/chat", json!({ "message": "hi", "model": "mistral/large" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unknown_provider");
    assert_eq!(body["error"]["model"], "mistral/large");
}

#[tokio::test]
async fn test_wrong_credentials_surface_as_provider_error() {
    let srv = TestServer::start().await;
    let (status, body) = srv
        .post(
            "/chat",
            json!({ "message": "hi", "model": "anthropic/claude-3-haiku", "anthropicApiKey": "wrong" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["model"], "anthropic/claude-3-haiku");
    assert!(body["error"]["message"].as_str().unwrap().contains("401"));
}

// ─── CLI ────────────────────────────────────────────────────────────

fn write_cli_config(root: &Path, mock: &str) -> std::path::PathBuf {
    let config_path = root.join("srag.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{root}/data/srag.sqlite"

[embedding]
url = "{mock}"
max_retries = 0

[providers]
ollama_endpoint = "{mock}"
"#,
            root = root.display(),
            mock = mock
        ),
    )
    .unwrap();
    config_path
}

async fn run_srag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let config_path = config_path.to_path_buf();
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let output = Command::new(env!("CARGO_BIN_EXE_srag"))
            .arg("--config")
            .arg(&config_path)
            .args(&args)
            .env_remove("OPENAI_API_KEY")
            .env_remove("ANTHROPIC_API_KEY")
            .output()
            .expect("failed to run srag");
        (
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            output.status.success(),
        )
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_cli_ingest_search_and_delete() {
    let mock = spawn_mock_backend().await;
    let tmp = TempDir::new().unwrap();
    let config_path = write_cli_config(tmp.path(), &mock);

    let fox_path = tmp.path().join("fox.txt");
    fs::write(&fox_path, "The quick brown fox").unwrap();
    let physics_path = tmp.path().join("physics.md");
    fs::write(&physics_path, "Quantum mechanics lecture notes").unwrap();

    let (stdout, stderr, ok) = run_srag(&config_path, &["ingest", fox_path.to_str().unwrap()]).await;
    assert!(ok, "ingest failed: {stderr}");
    assert!(stdout.starts_with("indexed doc:"));
    let fox_id = stdout.split_whitespace().nth(1).unwrap().to_string();

    let (_, stderr, ok) = run_srag(&config_path, &["ingest", physics_path.to_str().unwrap()]).await;
    assert!(ok, "ingest failed: {stderr}");

    let (stdout, _, ok) = run_srag(&config_path, &["search", "fox jumps"]).await;
    assert!(ok);
    let first = stdout.lines().next().unwrap();
    assert!(first.contains(&fox_id), "unexpected ranking: {stdout}");

    let (stdout, _, ok) = run_srag(&config_path, &["documents", "list"]).await;
    assert!(ok);
    assert_eq!(stdout.lines().count(), 2);

    let (_, _, ok) = run_srag(&config_path, &["documents", "delete", &fox_id]).await;
    assert!(ok);
    let (_, stderr, ok) = run_srag(&config_path, &["documents", "get", &fox_id]).await;
    assert!(!ok);
    assert!(stderr.contains("not found"));
}

#[tokio::test]
async fn test_cli_ask_chat_and_stream() {
    let mock = spawn_mock_backend().await;
    let tmp = TempDir::new().unwrap();
    let config_path = write_cli_config(tmp.path(), &mock);

    let (stdout, stderr, ok) =
        run_srag(&config_path, &["ask", "hello", "--model", "ollama/llama3.2"]).await;
    assert!(ok, "ask failed: {stderr}");
    assert_eq!(stdout.trim(), "ollama:llama3.2:user: hello");

    let (stdout, stderr, ok) = run_srag(
        &config_path,
        &["ask", "hello", "--model", "ollama/llama3.2", "--stream"],
    )
    .await;
    assert!(ok, "stream failed: {stderr}");
    assert_eq!(stdout.trim(), "ollama:llama3.2:user: hello");
}

#[tokio::test]
async fn test_cli_ask_reports_structured_failure() {
    let mock = spawn_mock_backend().await;
    let tmp = TempDir::new().unwrap();
    let config_path = write_cli_config(tmp.path(), &mock);

    let (_, stderr, ok) = run_srag(&config_path, &["ask", "hi", "--model", "openai/gpt-4o"]).await;
    assert!(!ok);
    assert!(stderr.contains("\"kind\":\"configuration\""), "stderr: {stderr}");
    assert!(stderr.contains("OpenAI API key not configured"));
    assert!(stderr.contains("\"model\":\"openai/gpt-4o\""), "stderr: {stderr}");
}
