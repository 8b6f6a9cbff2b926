//! WebSocket upgrade and socket loop.
//!
//! # Frame limits
//!
//! Text frames above [`MAX_FRAME_BYTES`] are answered with an `error` event
//! and the connection stays open. The socket itself accepts messages up to
//! [`MAX_SOCKET_MESSAGE_BYTES`]; anything larger is a protocol violation and
//! the socket is closed with `1009`.

use crate::actors::metrics::ActorType;
use crate::actors::{ConnectionActor, ConnectionActorHandle, ConnectionContext};
use crate::errors::HubError;
use crate::middleware::CallerId;
use crate::routes::AppState;
use crate::signaling::protocol::{ServerEvent, MAX_FRAME_BYTES};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Hard ceiling enforced by the socket. Above this the socket is closed.
pub const MAX_SOCKET_MESSAGE_BYTES: usize = 4 * MAX_FRAME_BYTES;

/// Interval between server pings.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// How long to wait for the connection actor to finish its leave.
const ACTOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler for GET /api/v1/ws
///
/// The caller identity comes from the identity header, checked by the
/// `require_caller` middleware before the upgrade.
///
/// # Response
///
/// - 101 Switching Protocols: socket accepted
/// - 401 Unauthorized: identity header missing
/// - 503 Service Unavailable: hub is shutting down
#[instrument(skip_all, name = "hub.transport.upgrade", fields(user_id = %caller.0))]
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.registry.is_cancelled() {
        return HubError::Draining.into_response();
    }

    let ctx = state.connections.clone();
    let user_id = caller.0;
    ws.max_message_size(MAX_SOCKET_MESSAGE_BYTES)
        .max_frame_size(MAX_SOCKET_MESSAGE_BYTES)
        .on_upgrade(move |socket| async move {
            let connection_id = Uuid::new_v4().to_string();
            handle_socket(socket, connection_id, user_id, ctx).await;
        })
}

/// Why the socket loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Client closed or the socket failed.
    Client,
    /// The hub closed the connection (superseded, overflow, shutdown).
    Hub,
    /// The client sent a message above the socket ceiling.
    TooLarge,
}

#[instrument(
    skip_all,
    name = "hub.transport.ws",
    fields(connection_id = %connection_id, user_id = %user_id)
)]
async fn handle_socket(
    mut socket: WebSocket,
    connection_id: String,
    user_id: String,
    ctx: ConnectionContext,
) {
    let cancel_token = ctx.registry.child_token();
    let metrics = Arc::clone(&ctx.metrics);
    let (handle, mut outbound, task_handle) =
        ConnectionActor::spawn(connection_id.clone(), user_id, ctx, cancel_token.clone());

    info!(target: "hub.transport.ws", connection_id = %connection_id, "WebSocket connected");

    let exit = run_socket(&mut socket, &handle, &mut outbound, &cancel_token).await;

    match exit {
        Exit::Hub => {
            // Anything already queued (e.g. `session-superseded`) goes out first.
            while let Ok(event) = outbound.try_recv() {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            close(&mut socket, close_code::NORMAL, "closed by hub").await;
        }
        Exit::TooLarge => {
            close(
                &mut socket,
                close_code::SIZE,
                &format!("message exceeds maximum size of {MAX_SOCKET_MESSAGE_BYTES} bytes"),
            )
            .await;
        }
        Exit::Client => {}
    }

    // Stops the actor, which leaves its room.
    cancel_token.cancel();
    drop(handle);

    match tokio::time::timeout(ACTOR_STOP_TIMEOUT, task_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_panic() => {
            error!(
                target: "hub.transport.ws",
                connection_id = %connection_id,
                error = ?e,
                "ConnectionActor panicked"
            );
            metrics.record_panic(ActorType::Connection);
        }
        Ok(Err(e)) => {
            warn!(
                target: "hub.transport.ws",
                connection_id = %connection_id,
                error = ?e,
                "ConnectionActor task failed"
            );
        }
        Err(_) => {
            warn!(
                target: "hub.transport.ws",
                connection_id = %connection_id,
                "ConnectionActor did not stop in time"
            );
        }
    }

    info!(
        target: "hub.transport.ws",
        connection_id = %connection_id,
        exit = ?exit,
        "WebSocket closed"
    );
}

async fn run_socket(
    socket: &mut WebSocket,
    handle: &ConnectionActorHandle,
    outbound: &mut mpsc::Receiver<ServerEvent>,
    cancel_token: &CancellationToken,
) -> Exit {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.reset();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => return Exit::Hub,

            maybe_event = outbound.recv() => {
                let Some(event) = maybe_event else {
                    return Exit::Hub;
                };
                if send_event(socket, &event).await.is_err() {
                    return Exit::Client;
                }
            }

            _ = ping.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    return Exit::Client;
                }
            }

            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    return Exit::Client;
                };

                match message {
                    Ok(Message::Text(text)) => {
                        let forwarded = if text.len() > MAX_FRAME_BYTES {
                            handle.reject(frame_too_large(text.len())).await
                        } else {
                            handle.frame(text).await
                        };
                        if forwarded.is_err() {
                            return Exit::Hub;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        if handle
                            .reject("Binary frames are not supported".to_string())
                            .await
                            .is_err()
                        {
                            return Exit::Hub;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return Exit::Client;
                        }
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => return Exit::Client,
                    Err(e) => {
                        debug!(target: "hub.transport.ws", error = %e, "WebSocket receive failed");
                        if is_size_violation(&e) {
                            return Exit::TooLarge;
                        }
                        return Exit::Client;
                    }
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    match event.encode() {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            warn!(
                target: "hub.transport.ws",
                event = event.name(),
                error = %e,
                "Dropping event that failed to encode"
            );
            Ok(())
        }
    }
}

async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

fn frame_too_large(len: usize) -> String {
    format!("Frame of {len} bytes exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too big")
        || message.contains("size limit")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_ceiling_allows_oversized_frames_to_be_reported() {
        assert!(MAX_SOCKET_MESSAGE_BYTES > MAX_FRAME_BYTES);
    }

    #[test]
    fn test_frame_too_large_names_both_sizes() {
        let reason = frame_too_large(70_000);
        assert!(reason.contains("70000"));
        assert!(reason.contains(&MAX_FRAME_BYTES.to_string()));
    }

    #[test]
    fn test_size_violation_detection() {
        let err = axum::Error::new(std::io::Error::other("Space limit exceeded: Message too long: 300000 > 262144"));
        assert!(is_size_violation(&err));

        let err = axum::Error::new(std::io::Error::other("Connection reset without closing handshake"));
        assert!(!is_size_violation(&err));
    }
}
