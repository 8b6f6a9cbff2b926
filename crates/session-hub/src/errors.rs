//! Session hub error types.
//!
//! One error type serves both client surfaces: WebSocket `error` events use
//! [`HubError::error_code`] and [`HubError::client_message`], and HTTP
//! handlers return `HubError` directly through its `IntoResponse` impl.
//! Internal details are logged server-side but not exposed to clients.

use crate::models::SessionStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// What the caller attempted when a lifecycle rule rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// A participant tried to enter the room.
    Join,
    /// A status change was requested.
    Transition(SessionStatus),
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleAction::Join => f.write_str("join"),
            LifecycleAction::Transition(target) => write!(f, "transition to {}", target.as_str()),
        }
    }
}

/// Session hub error type.
///
/// Maps to HTTP status codes:
/// - `SessionNotFound`: 404
/// - `InvalidLifecycleTransition`, `Conflict`: 409
/// - `NoOpenInterval`, `MalformedJoin`, `Validation`: 400
/// - `RecipientUnreachable`: 404 (normally only seen on the WebSocket)
/// - `PermissionDenied`: 403
/// - `Unauthenticated`: 401
/// - `Draining`: 503
/// - `Store`, `Internal`: 500
#[derive(Debug, Error)]
pub enum HubError {
    /// Referenced session has no stored record.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Lifecycle rule rejected the action; state is unchanged.
    #[error("Cannot {action} while session is {current}")]
    InvalidLifecycleTransition {
        current: SessionStatus,
        action: LifecycleAction,
    },

    /// Leave recorded without a matching open join.
    #[error("No open attendance interval for user {user_id}")]
    NoOpenInterval { user_id: String },

    /// Signaling target has no live connection in the room.
    #[error("Recipient unreachable: {to}")]
    RecipientUnreachable { to: String },

    /// Join request is missing identity fields.
    #[error("Malformed join: {0}")]
    MalformedJoin(String),

    /// Request failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No authenticated identity was supplied by the host.
    #[error("Missing authenticated identity")]
    Unauthenticated,

    /// Conflicting concurrent write or duplicate resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Session store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Hub is shutting down.
    #[error("Hub is draining")]
    Draining,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the client-facing error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            HubError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            HubError::InvalidLifecycleTransition { .. } => "INVALID_LIFECYCLE_TRANSITION",
            HubError::NoOpenInterval { .. } => "NO_OPEN_INTERVAL",
            HubError::RecipientUnreachable { .. } => "RECIPIENT_UNREACHABLE",
            HubError::MalformedJoin(_) => "MALFORMED_JOIN",
            HubError::Validation(_) => "BAD_REQUEST",
            HubError::PermissionDenied(_) => "FORBIDDEN",
            HubError::Unauthenticated => "UNAUTHENTICATED",
            HubError::Conflict(_) => "CONFLICT",
            HubError::Draining => "SERVICE_UNAVAILABLE",
            HubError::Store(_) | HubError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::SessionNotFound(_) | HubError::RecipientUnreachable { .. } => {
                StatusCode::NOT_FOUND
            }
            HubError::InvalidLifecycleTransition { .. } | HubError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            HubError::NoOpenInterval { .. }
            | HubError::MalformedJoin(_)
            | HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            HubError::Unauthenticated => StatusCode::UNAUTHORIZED,
            HubError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            HubError::Store(_) | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a bounded label string for the error variant (for metrics).
    pub fn error_type_label(&self) -> &'static str {
        match self {
            HubError::SessionNotFound(_) => "session_not_found",
            HubError::InvalidLifecycleTransition { .. } => "invalid_lifecycle_transition",
            HubError::NoOpenInterval { .. } => "no_open_interval",
            HubError::RecipientUnreachable { .. } => "recipient_unreachable",
            HubError::MalformedJoin(_) => "malformed_join",
            HubError::Validation(_) => "validation",
            HubError::PermissionDenied(_) => "permission_denied",
            HubError::Unauthenticated => "unauthenticated",
            HubError::Conflict(_) => "conflict",
            HubError::Store(_) => "store",
            HubError::Draining => "draining",
            HubError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            HubError::Store(_) | HubError::Internal(_) => "An internal error occurred".to_string(),
            HubError::SessionNotFound(_) => "Session not found".to_string(),
            HubError::Draining => "Server is shutting down, please reconnect".to_string(),
            HubError::Unauthenticated => "Authentication required".to_string(),
            HubError::InvalidLifecycleTransition { .. }
            | HubError::NoOpenInterval { .. }
            | HubError::RecipientUnreachable { .. } => self.to_string(),
            HubError::MalformedJoin(msg)
            | HubError::Validation(msg)
            | HubError::PermissionDenied(msg)
            | HubError::Conflict(msg) => msg.clone(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        match &self {
            HubError::Store(err) => {
                tracing::error!(target: "hub.store", error = %err, "Store operation failed");
            }
            HubError::Internal(err) => {
                tracing::error!(target: "hub.internal", error = %err, "Internal error");
            }
            _ => {}
        }

        crate::observability::metrics::record_error(self.error_type_label());

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(error_response)).into_response()
    }
}

impl From<redis::RedisError> for HubError {
    fn from(err: redis::RedisError) -> Self {
        HubError::Store(err.to_string())
    }
}
