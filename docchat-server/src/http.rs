//! docchat HTTP API
//!
//! Axum server for uploading PDFs, searching them and chatting over them.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /: service banner and the caller's conversation log
//! - POST /: upload PDFs (multipart, field `pdf`, repeated)
//! - POST /search: similarity search (form: `query`, optional `limit`)
//! - POST /chat: grounded chat (form: `message`)
//! - POST /chat/reset: forget the caller's conversation log
//! - GET  /health: health check with index stats
//! - GET  /version: server version info

use std::time::Instant;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::ApiError;
use crate::sessions;
use crate::state::AppState;
use crate::subsystems::chat::run_chat_turn;
use crate::subsystems::ingest::{ingest_documents, UploadedFile};
use crate::subsystems::retrieve::search_documents;

/// Multipart field carrying uploaded documents.
pub const UPLOAD_FIELD: &str = "pdf";

pub const PROTOCOL: &str = "docchat/1";

/// Build the Axum router with all endpoints
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.http.max_upload_bytes;
    Router::new()
        .route("/", get(index_handler).post(upload_handler))
        .route("/search", post(search_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/reset", post(reset_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("docchat HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct SearchForm {
    pub query: Option<String>,
    /// Kept as text so an empty form field reads as "not given".
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatForm {
    pub message: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner index: service banner plus the session's conversation log.
pub async fn index_inner(state: &AppState, session: Option<Uuid>) -> (StatusCode, serde_json::Value) {
    let history = match session {
        Some(id) => state.conversations.history(id).await,
        None => Vec::new(),
    };
    (
        StatusCode::OK,
        serde_json::json!({
            "service": "docchat",
            "version": env!("CARGO_PKG_VERSION"),
            "history": history,
        }),
    )
}

/// Inner upload: ingests the files and maps the report to a status.
///
/// 200 all indexed, 207 some indexed, 422 none indexed because of the files,
/// 503 none indexed because of the embedding API or the index, 400 no files.
pub async fn upload_inner(state: &AppState, files: Vec<UploadedFile>) -> (StatusCode, serde_json::Value) {
    if files.is_empty() {
        return ApiError::invalid(format!("no files uploaded in field '{UPLOAD_FIELD}'"))
            .into_parts();
    }

    let report = ingest_documents(
        files,
        state.embedder.as_ref(),
        state.index.as_ref(),
        &state.config.ingest,
    )
    .await;

    let status = if report.failed.is_empty() {
        StatusCode::OK
    } else if !report.indexed.is_empty() {
        StatusCode::MULTI_STATUS
    } else if report.upstream_failure() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };

    let mut body = serde_json::to_value(&report).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = body.as_object_mut() {
        let label = if status.is_success() { "ok" } else { "error" };
        obj.insert("status".to_string(), serde_json::json!(label));
        if status == StatusCode::SERVICE_UNAVAILABLE {
            obj.insert("retry".to_string(), serde_json::json!(report.retryable()));
        }
    }
    (status, body)
}

/// Inner search: validates the form, embeds and queries the index.
pub async fn search_inner(state: &AppState, form: SearchForm) -> (StatusCode, serde_json::Value) {
    let limit = match parse_limit(form.limit.as_deref()) {
        Ok(l) => l,
        Err(e) => return e.into_parts(),
    };
    let query = form.query.unwrap_or_default();

    let start = Instant::now();
    let result = search_documents(
        &query,
        limit,
        state.embedder.as_ref(),
        state.index.as_ref(),
        &state.config.retrieval,
    )
    .await;
    let took_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            let mut data =
                serde_json::to_value(&response).unwrap_or_else(|_| serde_json::json!({}));
            if let Some(obj) = data.as_object_mut() {
                obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
            }
            (StatusCode::OK, data)
        }
        Err(e) => e.into_parts(),
    }
}

/// Inner chat: answers the message and appends it to the session log.
pub async fn chat_inner(
    state: &AppState,
    session: Uuid,
    form: ChatForm,
) -> (StatusCode, serde_json::Value) {
    let message = form.message.unwrap_or_default();
    match run_chat_turn(state, session, &message).await {
        Ok(reply) => (
            StatusCode::OK,
            serde_json::to_value(&reply).unwrap_or_else(|_| serde_json::json!({})),
        ),
        Err(e) => e.into_parts(),
    }
}

/// Inner reset: drops the session's conversation log.
pub async fn reset_inner(state: &AppState, session: Option<Uuid>) -> (StatusCode, serde_json::Value) {
    let cleared = match session {
        Some(id) => state.conversations.clear(id).await,
        None => false,
    };
    (
        StatusCode::OK,
        serde_json::json!({ "status": "ok", "cleared": cleared }),
    )
}

/// Inner health check: asks the index for its stats.
pub async fn health_inner(state: &AppState) -> (StatusCode, serde_json::Value) {
    let stats = match state.index.describe().await {
        Ok(s) => s,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                    "retry": e.is_retryable(),
                }),
            );
        }
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "index": {
                "backend": state.index.name(),
                "dimension": stats.dimension,
                "total_vectors": stats.total_vectors,
            },
            "embedding": state.embedder.name(),
            "chat": state.chat.name(),
            "sessions": state.conversations.session_count().await,
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL,
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

pub async fn index_handler(State(state): State<AppState>, jar: SignedCookieJar) -> impl IntoResponse {
    let session = sessions::session_id(&jar, &state.config.sessions.cookie_name);
    let (status, body) = index_inner(&state, session).await;
    (status, Json(body))
}

pub async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let files = match read_uploads(&mut multipart).await {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };
    let (status, body) = upload_inner(&state, files).await;
    (status, Json(body)).into_response()
}

pub async fn search_handler(
    State(state): State<AppState>,
    Form(form): Form<SearchForm>,
) -> impl IntoResponse {
    let (status, body) = search_inner(&state, form).await;
    (status, Json(body))
}

pub async fn chat_handler(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<ChatForm>,
) -> impl IntoResponse {
    let (jar, session) = sessions::ensure_session(jar, &state.config.sessions.cookie_name);
    let (status, body) = chat_inner(&state, session, form).await;
    (status, jar, Json(body))
}

pub async fn reset_handler(State(state): State<AppState>, jar: SignedCookieJar) -> impl IntoResponse {
    let session = sessions::session_id(&jar, &state.config.sessions.cookie_name);
    let (status, body) = reset_inner(&state, session).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ============================================================================
// Helpers
// ============================================================================

/// Collect the `pdf` parts of an upload. Empty file inputs are skipped.
async fn read_uploads(multipart: &mut Multipart) -> Result<Vec<UploadedFile>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::invalid(format!("Malformed upload: {e}")))?;
        if bytes.is_empty() && filename.as_deref().map_or(true, str::is_empty) {
            continue;
        }
        files.push(UploadedFile { filename, bytes });
    }
    Ok(files)
}

/// Parse the optional `limit` form field; blank means "use the default".
pub fn parse_limit(raw: Option<&str>) -> Result<Option<usize>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ApiError::invalid(format!("limit must be a positive integer, got '{s}'"))),
    }
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
