//! HTTP adapter over the chat, index, and upload services.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/health` | Health check (returns version) |
//! | `POST` | `/api/upload` | Store a multipart `file` and record it in the ledger |
//! | `POST` | `/api/files` | List ledger entries |
//! | `POST` | `/api/files/{id}/index` | Ingest an uploaded file into the index |
//! | `POST` | `/api/chat` | Retrieval-augmented answer: `{message, history}` → `{reply, history, sources}` |
//!
//! `/api/upload`, `/api/files`, and `/api/chat` also answer with a trailing
//! slash.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `index_unavailable` (503), `internal` (500).
//!
//! Generation failures in `/api/chat` are not errors at this layer: the
//! reply becomes `"Error communicating with LLM: …"` with status 200.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatService, HistoryTurn};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::RagError;
use crate::generation::create_chat_model;
use crate::index::{BuildReport, IndexManager};
use crate::ledger::{LedgerEntry, UploadLedger};
use crate::models::RetrievalResult;
use crate::retrieve::Retriever;

/// Services shared by every handler and by the CLI.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<IndexManager>,
    pub ledger: Arc<UploadLedger>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    /// Wire up the ledger, index, retriever, and models from `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let ledger = Arc::new(
            UploadLedger::open(&config.uploads.dir, &config.uploads.ledger)
                .context("Failed to open upload ledger")?,
        );
        let embedder = create_provider(&config.embedding)?;
        let index = Arc::new(
            IndexManager::from_config(config, embedder, Some(Arc::clone(&ledger)))
                .await
                .context("Failed to open index database")?,
        );
        let model = create_chat_model(&config.generation)?;
        let retriever = Retriever::new(Arc::clone(&index), &config.retrieval);
        let chat = Arc::new(
            ChatService::new(retriever, model)
                .with_instructions(config.generation.system_prompt.clone()),
        );
        Ok(Self {
            index,
            ledger,
            chat,
        })
    }
}

/// Routes with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/upload", post(handle_upload))
        .route("/api/upload/", post(handle_upload))
        .route("/api/files", post(handle_files))
        .route("/api/files/", post(handle_files))
        .route("/api/files/{id}/index", post(handle_index_file))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    println!("docchat listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    axum::serve(listener, router(state)).await?;
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
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RagError::Validation(_) | RagError::Extract { .. } => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            RagError::AlreadyExists(_) => (StatusCode::CONFLICT, "conflict"),
            RagError::IndexUnavailable(_) | RagError::IndexCorrupt(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "index_unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    file: LedgerEntry,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("file field has no file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("reading upload: {}", e)))?;
        let entry = state.ledger.save_upload(&filename, &bytes).await?;
        return Ok(Json(UploadResponse {
            message: "Uploaded".to_string(),
            file: entry,
        }));
    }
    Err(bad_request("multipart field `file` is required"))
}

// ============ POST /api/files ============

async fn handle_files(State(state): State<AppState>) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    Ok(Json(state.ledger.list().await?))
}

// ============ POST /api/files/{id}/index ============

#[derive(Serialize)]
struct IndexFileResponse {
    file: LedgerEntry,
    report: BuildReport,
}

async fn handle_index_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexFileResponse>, AppError> {
    let report = state.index.ingest_upload(&state.ledger, &id).await?;
    let file = state.ledger.get(&id).await?;
    Ok(Json(IndexFileResponse { file, report }))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<HistoryTurn>,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    history: Vec<HistoryTurn>,
    sources: RetrievalResult,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let (reply, sources) = match state.chat.rag_answer(&req.message, &req.history).await {
        Ok(answer) => (answer.reply, answer.sources),
        Err(RagError::Generation(message)) => {
            tracing::warn!(error = %message, "generation failed");
            (format!("Error communicating with LLM: {}", message), Vec::new())
        }
        Err(other) => return Err(other.into()),
    };

    let mut history = req.history;
    history.push(HistoryTurn::user(req.message));
    Ok(Json(ChatResponse {
        reply,
        history,
        sources,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::HashProvider;
    use crate::generation::DisabledChatModel;
    use crate::index::Backend;
    use crate::normalize::Normalizer;
    use crate::store::InMemoryStore;
    use serde_json::{json, Value};

    async fn spawn(tmp: &std::path::Path) -> String {
        let dir = tmp.join("uploads");
        let ledger = Arc::new(UploadLedger::open(&dir, &dir.join("files_metadata.json")).unwrap());
        let index = Arc::new(
            IndexManager::new(
                Backend::Memory(Arc::new(InMemoryStore::new("srv"))),
                "srv",
                Arc::new(HashProvider::new(256)),
                Normalizer::default(),
            )
            .with_ledger(Arc::clone(&ledger)),
        );
        let retriever = Retriever::new(Arc::clone(&index), &RetrievalConfig::default());
        let chat = Arc::new(ChatService::new(retriever, Arc::new(DisabledChatModel)));
        let app = router(AppState {
            index,
            ledger,
            chat,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn upload(client: &reqwest::Client, base: &str, name: &str, body: &str) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(body.as_bytes().to_vec()).file_name(name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        client
            .post(format!("{}/api/upload", base))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn(tmp.path()).await;
        let body: Value = reqwest::get(format!("{}/api/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_upload_list_index_chat() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn(tmp.path()).await;
        let client = reqwest::Client::new();

        let resp = upload(&client, &base, "notes.txt", "export of large reports hangs").await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "Uploaded");
        let id = body["file"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["file"]["isIndexed"], false);

        let dup = upload(&client, &base, "notes.txt", "again").await;
        assert_eq!(dup.status(), 409);
        let err: Value = dup.json().await.unwrap();
        assert_eq!(err["error"]["code"], "conflict");

        let files: Value = client
            .post(format!("{}/api/files/", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(files.as_array().unwrap().len(), 1);

        let indexed: Value = client
            .post(format!("{}/api/files/{}/index", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(indexed["file"]["isIndexed"], true);
        assert_eq!(indexed["report"]["units"], 1);

        let chat: Value = client
            .post(format!("{}/api/chat", base))
            .json(&json!({ "message": "export large reports", "history": [] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(chat["reply"]
            .as_str()
            .unwrap()
            .starts_with("Error communicating with LLM:"));
        assert_eq!(chat["history"][0]["role"], "user");
        assert_eq!(chat["history"][0]["content"], "export large reports");
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_type() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn(tmp.path()).await;
        let client = reqwest::Client::new();

        let resp = upload(&client, &base, "diagram.png", "binary").await;
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"]["code"], "bad_request");

        let files: Value = client
            .post(format!("{}/api/files", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(files.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn(tmp.path()).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .json(&json!({ "message": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_index_unknown_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let base = spawn(tmp.path()).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/files/nope/index", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }
}
