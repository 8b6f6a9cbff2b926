//! HTTP request handlers for the session hub.

pub mod attendance;
pub mod sessions;

pub use attendance::{
    get_attendance, record_attendance_join, record_attendance_leave, set_attendance_status,
    watched_count,
};
pub use sessions::{
    create_session, delete_session, get_session, join_session, list_sessions, live_roster,
    update_session, update_session_status,
};

use crate::errors::HubError;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body, returning 400 (not Axum's default 422) on failure.
///
/// The serde message names the offending field, which is safe to return.
pub(crate) fn parse_body<T: DeserializeOwned>(target: &str, body: &[u8]) -> Result<T, HubError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "hub.handlers", handler = target, error = %e, "Invalid request body");
        HubError::Validation(format!("Invalid request body: {e}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::UpdateStatusRequest;

    #[test]
    fn test_parse_body_rejects_unknown_fields_as_bad_request() {
        let err = parse_body::<UpdateStatusRequest>("test", br#"{"status":"ended","extra":1}"#)
            .unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
        assert!(err.client_message().contains("extra"));
    }

    #[test]
    fn test_parse_body_accepts_valid_json() {
        let request = parse_body::<UpdateStatusRequest>("test", br#"{"status":"ongoing"}"#).unwrap();
        assert_eq!(request.status, crate::models::SessionStatus::Ongoing);
    }
}
