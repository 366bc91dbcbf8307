//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    AnswerRequest, AnswerResponse, CreateSessionRequest, CreateSessionResponse, ErrorResponse,
    LeadListResponse, LeadsQuery, SessionEventsResponse, UnloadRequest,
};
use super::AppState;
use crate::analytics::replay;
use crate::db::{Database, DbError, FunnelCounts, LeadRecord};
use crate::flow::StepGraph;
use crate::runtime::{RuntimeError, SessionSnapshot, SseEvent};
use crate::state_machine::Event;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        // Visitor actions
        .route("/api/sessions/:id/answer", post(send_answer))
        .route("/api/sessions/:id/unload", post(unload_session))
        // Flow definition for renderers
        .route("/api/flow", get(get_flow))
        // Local store reads
        .route("/api/leads", get(list_leads))
        .route("/api/leads/:session_id", get(get_lead))
        .route("/api/sessions/:id/events", get(session_events))
        .route("/api/funnel", get(get_funnel))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Session Handlers
// ============================================================

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let Json(req) = body.unwrap_or_default();
    let session_id = state.runtime.create_session(req.source).await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.runtime.snapshot(&id).await?))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (snapshot, broadcast_rx) = state.runtime.subscribe(&id).await?;
    Ok(sse_stream(SseEvent::Init { snapshot }, broadcast_rx))
}

/// Answers are queued; rejections reach the visitor over the stream
async fn send_answer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    state
        .runtime
        .send_event(&id, Event::Answer { value: req.value })
        .await?;
    Ok(Json(AnswerResponse { queued: true }))
}

/// Beacon endpoint. The page is already gone, so this never fails.
async fn unload_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> StatusCode {
    let req: UnloadRequest = if body.trim().is_empty() {
        UnloadRequest::default()
    } else {
        serde_json::from_str(&body).unwrap_or_default()
    };
    state.runtime.unload(&id, req.reason).await;
    StatusCode::NO_CONTENT
}

async fn get_flow(State(state): State<AppState>) -> Json<StepGraph> {
    Json(state.runtime.context().graph.as_ref().clone())
}

// ============================================================
// Store Handlers
// ============================================================

const DEFAULT_LEAD_LIMIT: u32 = 50;
const MAX_LEAD_LIMIT: u32 = 500;

fn store(state: &AppState) -> Result<&Database, AppError> {
    state
        .store
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Local store is not enabled".to_string()))
}

async fn list_leads(
    State(state): State<AppState>,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<LeadListResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEAD_LIMIT)
        .clamp(1, MAX_LEAD_LIMIT);
    let leads = store(&state)?.list_leads(limit)?;
    Ok(Json(LeadListResponse { leads }))
}

async fn get_lead(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<LeadRecord>, AppError> {
    Ok(Json(store(&state)?.get_lead(&session_id)?))
}

async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionEventsResponse>, AppError> {
    let events = store(&state)?.events_for_session(&id)?;
    if events.is_empty() {
        return Err(AppError::NotFound(format!("No events for session: {id}")));
    }

    let replayed = match replay(&state.runtime.context().graph, &events) {
        Ok(replayed) => Some(replayed),
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "Stored events do not fit the loaded flow");
            None
        }
    };
    Ok(Json(SessionEventsResponse { events, replayed }))
}

async fn get_funnel(State(state): State<AppState>) -> Result<Json<FunnelCounts>, AppError> {
    Ok(Json(store(&state)?.funnel_counts()?))
}

async fn get_version() -> &'static str {
    concat!("leadbot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<RuntimeError> for AppError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::SessionNotFound(_) => AppError::NotFound(err.to_string()),
            RuntimeError::SessionStopped(_) => AppError::Conflict(err.to_string()),
        }
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::LeadNotFound(_) => AppError::NotFound(err.to_string()),
            other => {
                tracing::error!(error = %other, "Store query failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
