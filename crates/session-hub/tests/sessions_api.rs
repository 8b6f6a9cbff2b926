//! Router tests for the HTTP management API.
//!
//! Requests go through `build_routes` with `tower::ServiceExt::oneshot`, so
//! the identity middleware, body parsing and error mapping are all exercised.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use hub_test_utils::{test_config, TestSession};
use serde_json::{json, Value};
use session_hub::actors::ActorMetrics;
use session_hub::config::DEFAULT_IDENTITY_HEADER;
use session_hub::models::SessionStatus;
use session_hub::routes::{build_routes, AppState};
use session_hub::store::{MemorySessionStore, SessionStore};
use std::sync::Arc;
use tower::ServiceExt;

struct Api {
    router: Router,
    state: Arc<AppState>,
    store: Arc<dyn SessionStore>,
}

impl Api {
    fn new() -> Self {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let state = Arc::new(AppState::new(
            test_config(&[]),
            Arc::clone(&store),
            ActorMetrics::new(),
        ));
        Self {
            router: build_routes(Arc::clone(&state)),
            state,
            store,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(DEFAULT_IDENTITY_HEADER, user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn set_status(&self, user: &str, id: &str, status: &str) -> (StatusCode, Value) {
        self.call(
            Method::PUT,
            &format!("/api/v1/sessions/{id}/status"),
            Some(user),
            Some(json!({ "status": status })),
        )
        .await
    }
}

#[tokio::test]
async fn test_requests_without_identity_are_rejected() {
    let api = Api::new();

    let (status, body) = api.call(Method::GET, "/api/v1/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");

    let (status, _) = api.call(Method::GET, "/api/v1/ws", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_session_makes_caller_host() {
    let api = Api::new();

    let (status, body) = api
        .call(
            Method::POST,
            "/api/v1/sessions",
            Some("prof-1"),
            Some(json!({
                "title": "Distributed Systems",
                "startTime": "2030-01-15T10:00:00Z",
                "instructor": "Dr. Lamport",
                "tags": ["consensus"]
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["hostId"], "prof-1");
    assert_eq!(body["status"], "scheduled");
    assert!(body.get("joinUrl").is_none());

    let id = body["id"].as_str().unwrap();
    let (status, fetched) = api
        .call(Method::GET, &format!("/api/v1/sessions/{id}"), Some("anyone"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "Distributed Systems");
}

#[tokio::test]
async fn test_create_session_rejects_bad_bodies() {
    let api = Api::new();

    let (status, body) = api
        .call(
            Method::POST,
            "/api/v1/sessions",
            Some("prof-1"),
            Some(json!({ "title": "Typo", "startTme": "2030-01-15T10:00:00Z" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = api
        .call(
            Method::POST,
            "/api/v1/sessions",
            Some("prof-1"),
            Some(json!({ "title": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_sessions_filters_by_status() {
    let api = Api::new();
    TestSession::new("Live one").ongoing().insert(api.store.as_ref()).await;
    TestSession::new("Later one").insert(api.store.as_ref()).await;

    let (status, body) = api
        .call(Method::GET, "/api/v1/sessions?status=ongoing", Some("u"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["sessions"][0]["title"], "Live one");

    let (status, _) = api
        .call(Method::GET, "/api/v1/sessions?page=zero", Some("u"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_transitions_are_enforced() {
    let api = Api::new();
    let session = TestSession::new("Lifecycle").host("prof-1").insert(api.store.as_ref()).await;
    let id = session.id.as_str();

    // Only the host may change status
    let (status, body) = api.set_status("student", id, "ongoing").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    // Scheduled -> Ended is not a valid edge
    let (status, body) = api.set_status("prof-1", id, "ended").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_LIFECYCLE_TRANSITION");

    let (status, body) = api.set_status("prof-1", id, "ongoing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Session started successfully");
    assert_eq!(body["session"]["status"], "ongoing");
    assert!(body["session"]["joinUrl"].as_str().is_some());

    let (status, body) = api.set_status("prof-1", id, "ended").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session"].get("joinUrl").is_none());

    // Terminal
    let (status, _) = api.set_status("prof-1", id, "ongoing").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = api.set_status("prof-1", id, "paused").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_accepts_capitalized_values() {
    let api = Api::new();
    let session = TestSession::new("Casing").host("prof-1").insert(api.store.as_ref()).await;

    let (status, body) = api.set_status("prof-1", &session.id, "Ongoing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "ongoing");

    let (status, body) = api.set_status("prof-1", &session.id, "Ended").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Session ended successfully");

    let (status, body) = api
        .call(Method::GET, "/api/v1/sessions?status=Ended", Some("u"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_join_is_gated_on_ongoing() {
    let api = Api::new();
    let session = TestSession::new("Gated").host("prof-1").insert(api.store.as_ref()).await;
    let join_uri = format!("/api/v1/sessions/{}/join", session.id);

    let (status, body) = api.call(Method::POST, &join_uri, Some("student"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_LIFECYCLE_TRANSITION");

    api.set_status("prof-1", &session.id, "ongoing").await;

    let (status, body) = api.call(Method::POST, &join_uri, Some("student"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["session"]["joinUrl"].as_str().is_some());
    assert!(body["session"]["participants"]
        .as_array()
        .unwrap()
        .contains(&json!("student")));

    let (status, body) = api
        .call(Method::POST, "/api/v1/sessions/missing/join", Some("student"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_update_and_delete_are_host_only() {
    let api = Api::new();
    let session = TestSession::new("Editable").host("prof-1").insert(api.store.as_ref()).await;
    let uri = format!("/api/v1/sessions/{}", session.id);

    let (status, _) = api
        .call(Method::PATCH, &uri, Some("student"), Some(json!({ "title": "Hijacked" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = api
        .call(Method::PATCH, &uri, Some("prof-1"), Some(json!({ "title": "Renamed" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Renamed");

    let (status, _) = api.call(Method::DELETE, &uri, Some("student"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = api.call(Method::DELETE, &uri, Some("prof-1"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = api.call(Method::GET, &uri, Some("prof-1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_attendance_endpoints() {
    let api = Api::new();
    let session = TestSession::new("Attendance")
        .host("prof-1")
        .ongoing()
        .insert(api.store.as_ref())
        .await;
    let base = format!("/api/v1/sessions/{}/attendance", session.id);

    // Leave with nothing open
    let (status, body) = api
        .call(Method::POST, &format!("{base}/leave"), Some("student"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NO_OPEN_INTERVAL");

    let (status, body) = api
        .call(Method::POST, &format!("{base}/join"), Some("student"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["opened"], true);

    // Idempotent while open
    let (_, body) = api
        .call(Method::POST, &format!("{base}/join"), Some("student"), None)
        .await;
    assert_eq!(body["opened"], false);

    let (status, body) = api
        .call(Method::POST, &format!("{base}/leave"), Some("student"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["interval"]["leftAt"].as_str().is_some());

    // Host override keeps intervals
    let (status, _) = api
        .call(
            Method::PUT,
            &format!("{base}/student/status"),
            Some("prof-1"),
            Some(json!({ "status": "excused" })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = api
        .call(
            Method::PUT,
            &format!("{base}/student/status"),
            Some("student"),
            Some(json!({ "status": "present" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = api.call(Method::GET, &base, Some("prof-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["userId"], "student");
    assert_eq!(body[0]["status"], "excused");
    assert_eq!(body[0]["intervals"].as_array().unwrap().len(), 1);

    let (status, _) = api.call(Method::GET, &base, Some("student"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Watched count: interval holders plus admitted participants
    api.call(
        Method::POST,
        &format!("/api/v1/sessions/{}/join", session.id),
        Some("lurker"),
        None,
    )
    .await;

    let (status, body) = api
        .call(Method::GET, &format!("{base}/watched"), Some("prof-1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalWatchedCount"], 2);

    let (_, body) = api
        .call(
            Method::GET,
            &format!("{base}/watched?users=student,nobody"),
            Some("prof-1"),
            None,
        )
        .await;
    assert_eq!(body["totalWatchedCount"], 1);
}

#[tokio::test]
async fn test_live_roster_for_session_without_room_is_empty() {
    let api = Api::new();
    let session = TestSession::new("Quiet")
        .status(SessionStatus::Ongoing)
        .insert(api.store.as_ref())
        .await;

    let (status, body) = api
        .call(
            Method::GET,
            &format!("/api/v1/sessions/{}/live", session.id),
            Some("u"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], session.id);
    assert_eq!(body["participants"], json!([]));

    let (status, _) = api
        .call(Method::GET, "/api/v1/sessions/missing/live", Some("u"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(api.state.registry.status().await.is_ok());
}
