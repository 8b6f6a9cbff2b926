//! HTTP routes for the session hub.
//!
//! Defines the Axum router and application state.

use crate::actors::{ActorMetrics, ConnectionContext, RoomRegistryHandle, RoomSettings};
use crate::attendance::AttendanceLedger;
use crate::config::Config;
use crate::handlers;
use crate::lifecycle::SessionLifecycle;
use crate::middleware::{require_caller, IdentityState};
use crate::store::SessionStore;
use crate::transport;
use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    pub lifecycle: SessionLifecycle,

    pub ledger: AttendanceLedger,

    /// Handle to the `RoomRegistryActor`.
    pub registry: RoomRegistryHandle,

    /// Shared by every WebSocket connection.
    pub connections: ConnectionContext,
}

impl AppState {
    /// Wire the use cases and spawn the actor system over `store`.
    pub fn new(config: Config, store: Arc<dyn SessionStore>, metrics: Arc<ActorMetrics>) -> Self {
        let lifecycle = SessionLifecycle::new(Arc::clone(&store), config.join_url_base.clone());
        let ledger = AttendanceLedger::new(Arc::clone(&store));

        let registry = RoomRegistryHandle::new(
            config.hub_id.clone(),
            RoomSettings {
                store,
                idle_timeout: config.room_idle_timeout,
            },
            Arc::clone(&metrics),
        );

        let connections = ConnectionContext {
            registry: registry.clone(),
            lifecycle: lifecycle.clone(),
            metrics,
            queue_capacity: config.connection_queue_capacity,
            overflow_policy: config.overflow_policy,
        };

        Self {
            config,
            lifecycle,
            ledger,
            registry,
            connections,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/api/v1/sessions` - Session management (create, list, get, update, delete, status, join)
/// - `/api/v1/sessions/:id/live` - Live roster
/// - `/api/v1/sessions/:id/attendance/...` - Attendance ledger
/// - `/api/v1/ws` - WebSocket upgrade for the live path
/// - Identity middleware on every route (401 without the identity header)
/// - TraceLayer for request logging
/// - Request timeout from configuration
///
/// Health and metrics endpoints are served separately on the health address.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let identity_state = Arc::new(IdentityState {
        header: HeaderName::from_bytes(state.config.identity_header.as_bytes())
            .unwrap_or_else(|_| HeaderName::from_static(crate::config::DEFAULT_IDENTITY_HEADER)),
    });
    let request_timeout = state.config.request_timeout;

    let api_routes = Router::new()
        .route(
            "/api/v1/sessions",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route(
            "/api/v1/sessions/:id",
            get(handlers::get_session)
                .patch(handlers::update_session)
                .delete(handlers::delete_session),
        )
        .route(
            "/api/v1/sessions/:id/status",
            put(handlers::update_session_status),
        )
        .route("/api/v1/sessions/:id/join", post(handlers::join_session))
        .route("/api/v1/sessions/:id/live", get(handlers::live_roster))
        .route(
            "/api/v1/sessions/:id/attendance",
            get(handlers::get_attendance),
        )
        .route(
            "/api/v1/sessions/:id/attendance/join",
            post(handlers::record_attendance_join),
        )
        .route(
            "/api/v1/sessions/:id/attendance/leave",
            post(handlers::record_attendance_leave),
        )
        .route(
            "/api/v1/sessions/:id/attendance/watched",
            get(handlers::watched_count),
        )
        .route(
            "/api/v1/sessions/:id/attendance/:user_id/status",
            put(handlers::set_attendance_status),
        )
        .route("/api/v1/ws", get(transport::ws_upgrade))
        .route_layer(middleware::from_fn_with_state(
            identity_state,
            require_caller,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    api_routes
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}
