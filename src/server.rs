//! HTTP surface
//!
//! Minimal HTTP/1.1 handling on a tokio TCP listener: health, dataset
//! statistics, schema, and the question endpoint.

use crate::config::AppConfig;
use crate::db::{DataStore, SqliteStore, StatQuery};
use crate::error::{EngineError, Result};
use crate::llm::LlmClient;
use crate::metadata::MetadataCatalog;
use crate::models::{Question, SourceHint};
use crate::orchestrator::Orchestrator;
use crate::schema_rag::{Embedder, MetadataRetriever};
use crate::visualization::PlotlyRenderer;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Everything a request needs, built once at startup.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub store: Arc<SqliteStore>,
    pub retriever: Arc<MetadataRetriever>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, store: Arc<SqliteStore>, retriever: Arc<MetadataRetriever>) -> Self {
        Self {
            orchestrator,
            store,
            retriever,
        }
    }

    /// Open the database, index the metadata directory and wire the engine.
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::open(&config.database_path)?.with_stat_queries(StatQuery::churn_defaults()),
        );
        let catalog = if config.metadata_dir.exists() {
            MetadataCatalog::load(&config.metadata_dir)?
        } else {
            warn!(dir = %config.metadata_dir.display(), "Metadata directory not found, retrieval context will be empty");
            MetadataCatalog::default()
        };
        info!(
            tables = catalog.tables.len(),
            examples = catalog.examples.len(),
            "Metadata indexed"
        );
        let retriever = match MetadataRetriever::build(catalog.clone(), Embedder::from_config(&config.llm)).await {
            Ok(retriever) => retriever,
            Err(e) => {
                warn!(error = %e, "Embedding API unavailable, indexing with local embeddings");
                MetadataRetriever::build(catalog, Embedder::default()).await?
            }
        };
        let retriever = Arc::new(retriever);

        let orchestrator = Orchestrator::new(
            Arc::new(LlmClient::new(config.llm.clone())),
            store.clone(),
            retriever.clone(),
            Arc::new(PlotlyRenderer),
            config.engine.clone(),
        );
        Ok(Self::new(orchestrator, store, retriever))
    }
}

/// Accept connections until the listener fails.
pub async fn serve(state: Arc<AppState>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "New connection");
        tokio::spawn(handle_connection(stream, state.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to read request");
            return;
        }
    };
    let response = handle_request(&request, &state).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!(error = %e, "Failed to write response");
    }
}

/// Read until the headers are complete and `Content-Length` bytes of body
/// have arrived.
async fn read_request(stream: &mut TcpStream) -> Result<String> {
    let mut data = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        let size = stream.read(&mut buffer).await?;
        if size == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..size]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(EngineError::Parse("Request too large".to_string()));
        }
        if let Some(header_end) = find_header_end(&data) {
            let headers = String::from_utf8_lossy(&data[..header_end]);
            let body_len = content_length(&headers);
            if body_len > MAX_REQUEST_BYTES {
                return Err(EngineError::Parse(format!("Content-Length {} exceeds limit", body_len)));
            }
            if data.len() >= header_end.saturating_add(4).saturating_add(body_len) {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    datasource: Option<String>,
    #[serde(default)]
    table: Option<String>,
}

pub async fn handle_request(request: &str, state: &AppState) -> String {
    let (head, body) = request.split_once("\r\n\r\n").unwrap_or((request, ""));
    let lines: Vec<&str> = head.lines().collect();
    if lines.is_empty() {
        return create_response(400, "Bad Request", r#"{"error":"Empty request"}"#);
    }

    let parts: Vec<&str> = lines[0].split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", r#"{"error":"Malformed request line"}"#);
    }
    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/");
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    let mut headers = HashMap::new();
    for line in &lines[1..] {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    debug!(method, path, "Request");

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/api/health") => {
            let (status, tables) = match state.store.list_tables().await {
                Ok(tables) => ("healthy", tables.len()),
                Err(e) => {
                    warn!(error = %e, "Health check could not list tables");
                    ("degraded", 0)
                }
            };
            let body = json!({
                "status": status,
                "store": state.store.name(),
                "tables": tables,
                "indexed_tables": state.retriever.catalog().tables.len(),
                "indexed_examples": state.retriever.catalog().examples.len(),
            });
            create_response(200, "OK", &body.to_string())
        }
        ("GET", "/api/stats") => {
            let stats = state.store.stats().await;
            create_response(200, "OK", &serde_json::Value::Object(stats).to_string())
        }
        ("GET", "/api/schema") => match state.store.schema().await {
            Ok(schema) => create_response(200, "OK", &serde_json::Value::Object(schema).to_string()),
            Err(e) => error_response(500, "Internal Server Error", &e.to_string()),
        },
        ("POST", "/api/query") => {
            if let Some(content_type) = headers.get("content-type") {
                if !content_type.starts_with("application/json") {
                    return error_response(415, "Unsupported Media Type", "Expected application/json");
                }
            }
            let request: QueryRequest = match serde_json::from_str(body.trim_end_matches('\0')) {
                Ok(request) => request,
                Err(e) => return error_response(400, "Bad Request", &format!("Invalid request body: {}", e)),
            };
            if request.question.trim().is_empty() {
                return error_response(400, "Bad Request", "Question is required");
            }
            let question = Question::with_hint(
                request.question.trim(),
                SourceHint {
                    datasource: request.datasource,
                    table: request.table,
                },
            );
            let response = state.orchestrator.execute(&question).await;
            match serde_json::to_string(&response) {
                Ok(body) => create_response(200, "OK", &body),
                Err(e) => error_response(500, "Internal Server Error", &e.to_string()),
            }
        }
        _ => error_response(404, "Not Found", &format!("No route for {} {}", method, path)),
    }
}

fn error_response(status: u16, status_text: &str, message: &str) -> String {
    create_response(status, status_text, &json!({ "error": message }).to_string())
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
