//! Session handlers.
//!
//! Implements session management endpoints:
//!
//! - `POST /api/v1/sessions` - Create session (caller becomes host)
//! - `GET /api/v1/sessions` - List sessions with filters and pagination
//! - `GET /api/v1/sessions/{id}` - Get session
//! - `PATCH /api/v1/sessions/{id}` - Update session fields (host only)
//! - `DELETE /api/v1/sessions/{id}` - Delete session and attendance (host only)
//! - `PUT /api/v1/sessions/{id}/status` - Lifecycle transition (host only)
//! - `POST /api/v1/sessions/{id}/join` - Lifecycle-gated join
//! - `GET /api/v1/sessions/{id}/live` - Live roster from the room registry

use crate::errors::HubError;
use crate::middleware::CallerId;
use crate::models::{
    CreateSessionRequest, Session, SessionActionResponse, SessionPage, SessionQuery,
    UpdateSessionRequest, UpdateStatusRequest,
};
use crate::routes::AppState;
use crate::signaling::protocol::ParticipantView;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use super::parse_body;

/// Live roster of a session's room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRosterResponse {
    pub session_id: String,
    /// In join order. Empty when no room is open.
    pub participants: Vec<ParticipantView>,
}

/// Handler for POST /api/v1/sessions
///
/// # Response
///
/// - 201 Created: Session created, caller is the host
/// - 400 Bad Request: Invalid body or field validation failure
/// - 401 Unauthorized: Missing caller identity
#[instrument(
    skip_all,
    name = "hub.sessions.create",
    fields(method = "POST", endpoint = "/api/v1/sessions", host_id = %caller.0)
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    body: Bytes,
) -> Result<(StatusCode, Json<Session>), HubError> {
    let request: CreateSessionRequest = parse_body("create_session", &body)?;
    let session = state.lifecycle.create(&caller.0, request).await?;

    info!(
        target: "hub.handlers.sessions",
        session_id = %session.id,
        host_id = %caller.0,
        "Session created"
    );

    Ok((StatusCode::CREATED, Json(session)))
}

/// Handler for GET /api/v1/sessions
///
/// Supports `search`, `status`, `instructor`, `course`, `page` and `limit`.
#[instrument(
    skip_all,
    name = "hub.sessions.list",
    fields(method = "GET", endpoint = "/api/v1/sessions")
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<SessionPage>, HubError> {
    let Query(query) = query.map_err(|e| {
        tracing::debug!(target: "hub.handlers.sessions", error = %e, "Invalid query");
        HubError::Validation(format!("Invalid query parameters: {e}"))
    })?;

    Ok(Json(state.lifecycle.list(&query).await?))
}

/// Handler for GET /api/v1/sessions/{id}
#[instrument(
    skip_all,
    name = "hub.sessions.get",
    fields(method = "GET", endpoint = "/api/v1/sessions/{id}", session_id = %session_id)
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, HubError> {
    Ok(Json(state.lifecycle.get(&session_id).await?))
}

/// Handler for PATCH /api/v1/sessions/{id}
///
/// # Response
///
/// - 200 OK: Updated session
/// - 400 Bad Request: Unknown field or validation failure
/// - 403 Forbidden: Caller is not the host
/// - 404 Not Found: No such session
/// - 409 Conflict: Concurrent writers exhausted the retry budget
#[instrument(
    skip_all,
    name = "hub.sessions.update",
    fields(method = "PATCH", endpoint = "/api/v1/sessions/{id}", session_id = %session_id)
)]
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<Session>, HubError> {
    let request: UpdateSessionRequest = parse_body("update_session", &body)?;
    let session = state
        .lifecycle
        .update(&caller.0, &session_id, request)
        .await?;
    Ok(Json(session))
}

/// Handler for DELETE /api/v1/sessions/{id}
#[instrument(
    skip_all,
    name = "hub.sessions.delete",
    fields(method = "DELETE", endpoint = "/api/v1/sessions/{id}", session_id = %session_id)
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, HubError> {
    state.lifecycle.delete(&caller.0, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for PUT /api/v1/sessions/{id}/status
///
/// # Response
///
/// - 200 OK: `{message, session}` with the status message for the target
/// - 403 Forbidden: Caller is not the host
/// - 404 Not Found: No such session
/// - 409 Conflict: Transition not allowed from the current status
#[instrument(
    skip_all,
    name = "hub.sessions.status",
    fields(method = "PUT", endpoint = "/api/v1/sessions/{id}/status", session_id = %session_id)
)]
pub async fn update_session_status(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Json<SessionActionResponse>, HubError> {
    let request: UpdateStatusRequest = parse_body("update_session_status", &body)?;
    let response = state
        .lifecycle
        .transition(&caller.0, &session_id, request.status)
        .await?;
    Ok(Json(response))
}

/// Handler for POST /api/v1/sessions/{id}/join
///
/// Admits the caller while the session is `ongoing` and returns the join URL
/// on the session record.
#[instrument(
    skip_all,
    name = "hub.sessions.join",
    fields(method = "POST", endpoint = "/api/v1/sessions/{id}/join", session_id = %session_id)
)]
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionActionResponse>, HubError> {
    let response = state.lifecycle.join(&caller.0, &session_id).await?;

    info!(
        target: "hub.handlers.sessions",
        session_id = %session_id,
        user_id = %caller.0,
        "Participant admitted"
    );

    Ok(Json(response))
}

/// Handler for GET /api/v1/sessions/{id}/live
///
/// The session must exist; a session with no open room has an empty roster.
#[instrument(
    skip_all,
    name = "hub.sessions.live",
    fields(method = "GET", endpoint = "/api/v1/sessions/{id}/live", session_id = %session_id)
)]
pub async fn live_roster(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<LiveRosterResponse>, HubError> {
    state.lifecycle.get(&session_id).await?;
    let participants = state.registry.roster(session_id.clone()).await?;

    Ok(Json(LiveRosterResponse {
        session_id,
        participants,
    }))
}
