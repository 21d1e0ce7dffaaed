//! HTTP request handlers

use super::types::{
    ChatRequest, ChatResponse, CreateSessionResponse, ErrorResponse, HealthResponse, SessionResponse,
};
use super::AppState;
use crate::orchestrator::{TurnError, TurnErrorCode};
use crate::session::{Citation, SessionError};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

const MAX_SOURCES: usize = 10;
const HISTORY_PREVIEW: usize = 10;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/api/trip/chat", post(chat))
        .route("/api/trip/session", post(create_session))
        .route("/api/trip/session/:id", get(get_session).delete(delete_session))
        .with_state(state)
}

// ============================================================
// Chat
// ============================================================

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<Json<ChatResponse>, AppError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".to_string()));
    }

    let outcome = state
        .orchestrator
        .process_turn(req.session_id.as_deref(), message)
        .await?;

    let session = state.orchestrator.sessions().get(&outcome.session_id)?;

    Ok(Json(ChatResponse {
        status: "success",
        response: outcome.response,
        session_id: outcome.session_id,
        tool_calls: outcome.tool_calls_made,
        usage: outcome.usage,
        cached: outcome.cached,
        itinerary: session.itinerary,
        sources: unique_sources(&session.citations),
        error_code: outcome.error_code.map(TurnErrorCode::as_str),
    }))
}

/// First citation per url, capped for display
fn unique_sources(citations: &[Citation]) -> Vec<Citation> {
    let mut sources: Vec<Citation> = Vec::new();
    for citation in citations {
        if sources.len() == MAX_SOURCES {
            break;
        }
        if !citation.url.is_empty() && sources.iter().any(|s| s.url == citation.url) {
            continue;
        }
        sources.push(citation.clone());
    }
    sources
}

// ============================================================
// Sessions
// ============================================================

async fn create_session(State(state): State<AppState>) -> Json<CreateSessionResponse> {
    Json(CreateSessionResponse {
        session_id: state.orchestrator.sessions().create(),
    })
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SessionResponse>, AppError> {
    let sessions = state.orchestrator.sessions();
    let history = sessions.recent_history(&id, HISTORY_PREVIEW)?;
    let session = sessions.get(&id)?;

    Ok(Json(SessionResponse {
        session_id: session.id,
        conversation_history: history,
        user_preferences: session.user_preferences,
        itinerary: session.itinerary,
        sources: unique_sources(&session.citations),
        questions_asked: session.questions_asked,
    }))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    state.orchestrator.sessions().delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Service info
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let controller = state.orchestrator.controller();
    Json(HealthResponse {
        status: "healthy",
        backends: controller.backend_ids(),
        active_backend: controller.active_backend_id(),
    })
}

async fn banner() -> &'static str {
    concat!("trip-orchestrator ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    Session(SessionError),
    Turn(TurnError),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Session(err)
    }
}

impl From<TurnError> for AppError {
    fn from(err: TurnError) -> Self {
        AppError::Turn(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg, "bad_request"))).into_response()
            }
            AppError::Session(err) => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new(err.to_string(), "session_not_found")),
            )
                .into_response(),
            AppError::Turn(err) => turn_error_response(&err),
        }
    }
}

fn turn_error_response(err: &TurnError) -> Response {
    let status = match err {
        TurnError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        TurnError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        TurnError::InvalidRequest(_) | TurnError::ToolArgumentParse { .. } => StatusCode::BAD_GATEWAY,
        TurnError::Session(_) => StatusCode::NOT_FOUND,
    };
    let body = Json(ErrorResponse::new(err.user_message(), err.code().as_str()));

    match err {
        TurnError::RateLimited {
            retry_after: Some(wait),
            ..
        } => (status, [(header::RETRY_AFTER, wait.as_secs().max(1).to_string())], body).into_response(),
        _ => (status, body).into_response(),
    }
}
