//! Caller identity middleware.
//!
//! Authentication happens in the host in front of the hub. The host passes
//! the authenticated user id in a configurable header; this middleware makes
//! it available to handlers as a [`CallerId`] extension and rejects requests
//! that do not carry one.

use crate::errors::HubError;
use axum::{
    extract::{Request, State},
    http::HeaderName,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// Authenticated caller, as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

/// State for the identity middleware.
#[derive(Clone, Debug)]
pub struct IdentityState {
    /// Header carrying the caller id.
    pub header: HeaderName,
}

/// Read the caller id from `header`. Blank values count as missing.
fn extract_caller(req: &Request, header: &HeaderName) -> Result<CallerId, HubError> {
    let value = req
        .headers()
        .get(header)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            tracing::debug!(target: "hub.middleware.identity", "Missing caller identity header");
            HubError::Unauthenticated
        })?;

    Ok(CallerId(value.to_string()))
}

/// Identity middleware for API routes.
///
/// # Response
///
/// - Returns 401 Unauthorized if the identity header is missing or blank
/// - Continues to next handler with `CallerId` in extensions otherwise
#[instrument(skip_all, name = "hub.middleware.identity")]
pub async fn require_caller(
    State(state): State<Arc<IdentityState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, HubError> {
    let caller = extract_caller(&req, &state.header)?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    async fn whoami(Extension(caller): Extension<CallerId>) -> String {
        caller.0
    }

    fn app() -> Router {
        let state = Arc::new(IdentityState {
            header: HeaderName::from_static("x-authenticated-user"),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state, require_caller))
    }

    #[tokio::test]
    async fn test_caller_is_injected() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("x-authenticated-user", "prof-1")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"prof-1");
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_blank_header_is_unauthorized() {
        let request = HttpRequest::builder()
            .uri("/whoami")
            .header("x-authenticated-user", "   ")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
