//! Health endpoints for the session hub.
//!
//! - `GET /health` - liveness: 503 once the registry task has stopped
//!   without a shutdown being requested (the hub can no longer open rooms)
//! - `GET /ready` - readiness: 503 before startup completes, while draining,
//!   and whenever the session store does not answer a ping
//!
//! The `/metrics` endpoint is mounted next to these in `main.rs` and
//! rendered by `metrics-exporter-prometheus`.

use crate::actors::RoomRegistryHandle;
use crate::store::SessionStore;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Upper bound on the store round-trip made by `/ready`.
const STORE_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// What the health endpoints look at.
pub struct HealthState {
    /// Set once both listeners are bound; cleared when shutdown starts.
    accepting: AtomicBool,
    registry: RoomRegistryHandle,
    store: Arc<dyn SessionStore>,
}

impl HealthState {
    /// Not ready until [`HealthState::set_ready`] is called.
    #[must_use]
    pub fn new(registry: RoomRegistryHandle, store: Arc<dyn SessionStore>) -> Self {
        Self {
            accepting: AtomicBool::new(false),
            registry,
            store,
        }
    }

    /// Mark startup as complete.
    pub fn set_ready(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// False only if the registry went away on its own.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.registry.is_running() || self.registry.is_cancelled()
    }

    /// Startup done, not draining, registry up, and the store answers.
    pub async fn is_ready(&self) -> bool {
        if !self.accepting.load(Ordering::SeqCst)
            || self.registry.is_cancelled()
            || !self.registry.is_running()
        {
            return false;
        }

        match tokio::time::timeout(STORE_PING_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(target: "hub.health", error = %e, "Session store ping failed");
                false
            }
            Err(_) => {
                warn!(target: "hub.health", "Session store ping timed out");
                false
            }
        }
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
