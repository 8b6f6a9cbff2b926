//! Attendance handlers.
//!
//! - `POST /api/v1/sessions/{id}/attendance/join` - Open an interval for the caller
//! - `POST /api/v1/sessions/{id}/attendance/leave` - Close the caller's open interval
//! - `PUT /api/v1/sessions/{id}/attendance/{user_id}/status` - Manual status (host only)
//! - `GET /api/v1/sessions/{id}/attendance` - Query attendance (host only)
//! - `GET /api/v1/sessions/{id}/attendance/watched` - Aggregate watched count
//!
//! Timestamps are taken when the request is handled.

use crate::errors::HubError;
use crate::middleware::CallerId;
use crate::models::{
    AttendanceJoinResponse, AttendanceLeaveResponse, AttendanceQuery, AttendanceStatusRequest,
    AttendanceView, WatchedCountResponse, WatchedQuery,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

use super::parse_body;

fn query_error(e: &QueryRejection) -> HubError {
    tracing::debug!(target: "hub.handlers.attendance", error = %e, "Invalid query");
    HubError::Validation(format!("Invalid query parameters: {e}"))
}

/// Handler for POST /api/v1/sessions/{id}/attendance/join
///
/// Idempotent: a second join while an interval is open returns
/// `opened: false` and records nothing.
#[instrument(
    skip_all,
    name = "hub.attendance.join",
    fields(session_id = %session_id, user_id = %caller.0)
)]
pub async fn record_attendance_join(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(session_id): Path<String>,
) -> Result<Json<AttendanceJoinResponse>, HubError> {
    let opened = state
        .ledger
        .record_join(&session_id, &caller.0, Utc::now())
        .await?;

    Ok(Json(AttendanceJoinResponse {
        message: if opened {
            "Attendance join recorded".to_string()
        } else {
            "Attendance already open".to_string()
        },
        opened,
    }))
}

/// Handler for POST /api/v1/sessions/{id}/attendance/leave
///
/// # Response
///
/// - 200 OK: The closed interval
/// - 400 Bad Request: `NO_OPEN_INTERVAL` when the caller has no open interval
/// - 404 Not Found: No such session
#[instrument(
    skip_all,
    name = "hub.attendance.leave",
    fields(session_id = %session_id, user_id = %caller.0)
)]
pub async fn record_attendance_leave(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(session_id): Path<String>,
) -> Result<Json<AttendanceLeaveResponse>, HubError> {
    let interval = state
        .ledger
        .record_leave(&session_id, &caller.0, Utc::now())
        .await?;

    Ok(Json(AttendanceLeaveResponse {
        message: "Attendance leave recorded".to_string(),
        interval,
    }))
}

/// Handler for PUT /api/v1/sessions/{id}/attendance/{user_id}/status
#[instrument(
    skip_all,
    name = "hub.attendance.status",
    fields(session_id = %session_id, user_id = %user_id)
)]
pub async fn set_attendance_status(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path((session_id, user_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, HubError> {
    let request: AttendanceStatusRequest = parse_body("set_attendance_status", &body)?;
    state
        .ledger
        .set_status(
            &caller.0,
            &session_id,
            &user_id,
            &request.status,
            request.display_name.as_deref(),
        )
        .await?;

    info!(
        target: "hub.handlers.attendance",
        session_id = %session_id,
        user_id = %user_id,
        "Attendance status set"
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /api/v1/sessions/{id}/attendance
///
/// Supports `from`, `to` (RFC 3339), `status` and `userId` filters.
#[instrument(skip_all, name = "hub.attendance.get", fields(session_id = %session_id))]
pub async fn get_attendance(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(session_id): Path<String>,
    query: Result<Query<AttendanceQuery>, QueryRejection>,
) -> Result<Json<Vec<AttendanceView>>, HubError> {
    let Query(query) = query.map_err(|e| query_error(&e))?;
    let views = state
        .ledger
        .get(&caller.0, &session_id, &query, Utc::now())
        .await?;
    Ok(Json(views))
}

/// Handler for GET /api/v1/sessions/{id}/attendance/watched
///
/// `?users=a,b` restricts the count to the listed users.
#[instrument(skip_all, name = "hub.attendance.watched", fields(session_id = %session_id))]
pub async fn watched_count(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    query: Result<Query<WatchedQuery>, QueryRejection>,
) -> Result<Json<WatchedCountResponse>, HubError> {
    let Query(query) = query.map_err(|e| query_error(&e))?;
    let total_watched_count = match query.user_ids() {
        Some(users) => state.ledger.total_watched_count(&session_id, &users).await?,
        None => state.ledger.watched_count(&session_id).await?,
    };

    Ok(Json(WatchedCountResponse {
        session_id,
        total_watched_count,
    }))
}
