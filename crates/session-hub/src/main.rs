//! Session Hub
//!
//! Live session hub: WebSocket signaling, live rosters, lifecycle gating and
//! attendance tracking.
//!
//! # Servers
//!
//! - HTTP server for the management API and `/api/v1/ws` (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (text or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Connect the session store (Redis, or in-memory for local development)
//! 5. Initialize actor system (`RoomRegistryHandle`)
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start API server, mark ready
//! 8. Wait for shutdown signal, then drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use secrecy::ExposeSecret;
use session_hub::actors::ActorMetrics;
use session_hub::config::{Config, LogFormat, StoreBackend};
use session_hub::observability::{health_router, init_metrics_recorder, HealthState};
use session_hub::routes::{build_routes, AppState};
use session_hub::store::{MemorySessionStore, RedisSessionStore, SessionStore};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time given to open sockets to close after the registry starts draining.
const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration before tracing so the log format is known.
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(config.log_format);

    info!("Starting Session Hub");
    info!(
        hub_id = %config.hub_id,
        store_backend = ?config.store_backend,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        connection_queue_capacity = config.connection_queue_capacity,
        overflow_policy = config.overflow_policy.as_str(),
        room_idle_timeout_seconds = config.room_idle_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let store: Arc<dyn SessionStore> = match config.store_backend {
        StoreBackend::Redis => {
            info!("Connecting to Redis...");
            let redis_url = config
                .redis_url
                .as_ref()
                .ok_or("REDIS_URL is required for the redis store backend")?;
            let store = RedisSessionStore::new(redis_url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to Redis");
                    e
                })?;
            info!("Redis connection established");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory session store; data is lost on restart");
            Arc::new(MemorySessionStore::new())
        }
    };

    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&store), actor_metrics));
    let registry = state.registry.clone();
    info!("Actor system initialized");

    let health_state = Arc::new(HealthState::new(registry.clone(), store));

    // Servers stop with the registry's token
    let shutdown_token = registry.child_token();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start API + WebSocket server
    let api_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let api_listener = tokio::net::TcpListener::bind(api_addr).await.map_err(|e| {
        error!(error = %e, addr = %api_addr, "Failed to bind API server");
        format!("Failed to bind API server to {api_addr}: {e}")
    })?;

    let app = build_routes(Arc::clone(&state));
    let api_shutdown_token = shutdown_token.child_token();
    let api_server = tokio::spawn(async move {
        info!(addr = %api_addr, "API server starting");
        let server = axum::serve(api_listener, app).with_graceful_shutdown(async move {
            api_shutdown_token.cancelled().await;
            info!("API server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server failed");
        }
    });

    health_state.set_ready();
    info!("Session Hub running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    // Cancels rooms and connections; sockets get a close frame
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    tokio::time::sleep(DRAIN_GRACE_PERIOD).await;

    if tokio::time::timeout(Duration::from_secs(30), api_server)
        .await
        .is_err()
    {
        warn!("API server did not stop in time");
    }

    info!("Session Hub shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "session_hub=debug,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
