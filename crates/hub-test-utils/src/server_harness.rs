//! Test server harness for E2E testing
//!
//! Provides `TestHubServer` for spawning a real hub on a loopback port, and
//! `WsClient`, a small WebSocket client speaking the hub's JSON protocol.

use crate::fixtures::test_config;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use session_hub::actors::ActorMetrics;
use session_hub::config::{Config, DEFAULT_IDENTITY_HEADER};
use session_hub::routes::{build_routes, AppState};
use session_hub::store::{MemorySessionStore, SessionStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long `WsClient` waits for an expected frame.
pub const WS_TIMEOUT: Duration = Duration::from_secs(5);

/// Test harness for spawning the session hub in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> anyhow::Result<()> {
///     let server = TestHubServer::spawn().await?;
///     let response = server
///         .request(reqwest::Method::GET, "/api/v1/sessions", "alice")
///         .send()
///         .await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestHubServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    store: Arc<dyn SessionStore>,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestHubServer {
    /// Spawn a hub over a fresh in-memory store with the test configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(test_config(&[]), Arc::new(MemorySessionStore::new())).await
    }

    /// Spawn a hub over `store`.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with(
        config: Config,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, anyhow::Error> {
        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&store),
            ActorMetrics::new(),
        ));

        // Build routes using the hub's real route builder
        let app = build_routes(Arc::clone(&state));

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            store,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket endpoint URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared application state (registry, lifecycle, ledger).
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The store the hub writes to.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// An API request authenticated as `user_id`.
    pub fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        user_id: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.url(), path))
            .header(DEFAULT_IDENTITY_HEADER, user_id)
    }

    /// Open a WebSocket authenticated as `user_id`.
    pub async fn connect(&self, user_id: &str) -> Result<WsClient, anyhow::Error> {
        let mut request = self.ws_url().into_client_request()?;
        request
            .headers_mut()
            .insert(DEFAULT_IDENTITY_HEADER, HeaderValue::from_str(user_id)?);

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(WsClient { stream })
    }
}

impl Drop for TestHubServer {
    fn drop(&mut self) {
        // Stop the actor system and the HTTP server task
        self.state.registry.cancel();
        self._handle.abort();
    }
}

/// WebSocket client for the hub's `{event, data}` protocol.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Send `{"event": event, "data": data}`.
    pub async fn send_event(&mut self, event: &str, data: Value) -> Result<(), anyhow::Error> {
        self.send_text(&json!({ "event": event, "data": data }).to_string())
            .await
    }

    /// Send `join-room`.
    pub async fn join(
        &mut self,
        session_id: &str,
        user_id: &str,
        username: &str,
    ) -> Result<(), anyhow::Error> {
        self.send_event(
            "join-room",
            json!({ "sessionId": session_id, "userId": user_id, "username": username }),
        )
        .await
    }

    /// Next JSON event. Control frames are skipped; `None` once closed.
    pub async fn next_json(&mut self) -> Result<Option<Value>, anyhow::Error> {
        loop {
            let frame = tokio::time::timeout(WS_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a WebSocket frame"))?;

            match frame {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Next event named `name`, skipping any others.
    pub async fn next_named(&mut self, name: &str) -> Result<Value, anyhow::Error> {
        loop {
            match self.next_json().await? {
                Some(event) if event["event"] == name => return Ok(event),
                Some(_) => continue,
                None => anyhow::bail!("socket closed while waiting for '{name}'"),
            }
        }
    }

    /// Wait until the server closes the socket, skipping any events.
    pub async fn closed(&mut self) -> Result<(), anyhow::Error> {
        while self.next_json().await?.is_some() {}
        Ok(())
    }

    /// Close the socket from the client side.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream.close(None).await?;
        Ok(())
    }
}
