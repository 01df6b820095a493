//! HTTP boundary for the chat path.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a message within a session |
//! | `POST` | `/reset` | Clear a session's conversation |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "new_message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! A failure while answering is *not* an HTTP error: `/chat` still returns
//! 200 with `"Error occurred: ..."` as the response text.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! on another port can call the API.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::models::ChatTurn;
use crate::session::{ChatReply, ChatService};

#[derive(Clone)]
struct AppState {
    chat: Arc<ChatService>,
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// bind it to an ephemeral port.
pub fn router(chat: Arc<ChatService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/reset", post(handle_reset))
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(AppState { chat })
}

/// Bind to `bind` and serve until the process is terminated.
pub async fn run_server(bind: &str, chat: Arc<ChatService>) -> anyhow::Result<()> {
    let app = router(chat);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");
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
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

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

async fn handle_not_found() -> AppError {
    not_found("no such endpoint")
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    /// Full client-side history. When present it replaces the stored one.
    #[serde(default)]
    conversation: Option<Vec<ChatTurn>>,
    new_message: String,
}

/// The exchange runs on its own task so a panic inside a store driver
/// becomes a 500 instead of a dropped connection.
async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    if request.new_message.trim().is_empty() {
        return Err(bad_request("new_message must not be empty"));
    }

    let chat = state.chat.clone();
    let reply = tokio::spawn(async move {
        chat.chat(
            request.session_id,
            request.conversation.as_deref(),
            &request.new_message,
        )
        .await
    })
    .await
    .map_err(|e| internal(format!("chat task failed: {}", e)))?;

    Ok(Json(reply))
}

// ============ POST /reset ============

#[derive(Debug, Deserialize)]
struct ResetRequest {
    session_id: String,
}

#[derive(Serialize)]
struct ResetResponse {
    message: String,
}

async fn handle_reset(
    State(state): State<AppState>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> Result<Json<ResetResponse>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    if request.session_id.trim().is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }
    Ok(Json(ResetResponse {
        message: state.chat.reset(&request.session_id),
    }))
}
