//! `ConnectionActor` - per-WebSocket connection actor.
//!
//! Each `ConnectionActor`:
//! - Handles exactly one client connection for one authenticated user
//! - Decodes client frames and dispatches them to its room
//! - Owns the `ConnectionBinding` created when the client joins
//! - Owns the sending half of the connection's bounded outbound queue
//!
//! # Lifecycle
//!
//! 1. Spawned by the transport when the WebSocket upgrade completes
//! 2. Bound to a room by a successful `join-room`
//! 3. Runs until the socket closes, the queue overflows, the connection is
//!    superseded, or the hub shuts down
//! 4. On exit, leaves its room (a no-op if it was superseded)

use crate::config::OverflowPolicy;
use crate::errors::HubError;
use crate::lifecycle::SessionLifecycle;
use crate::observability::metrics::{record_error, record_message_latency};
use crate::signaling::broadcast::RoomEvent;
use crate::signaling::protocol::{ClientEvent, JoinRoom, ServerEvent, SignalEnvelope, SignalKind};
use crate::signaling::ConnectionHandle;

use super::messages::{ConnectionBinding, ConnectionMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::RoomRegistryHandle;
use super::room::RoomActorHandle;
use super::roster::ParticipantInit;

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Everything a connection needs from the rest of the hub.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: RoomRegistryHandle,
    pub lifecycle: SessionLifecycle,
    pub metrics: Arc<ActorMetrics>,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Forward one text frame from the client.
    pub async fn frame(&self, text: String) -> Result<(), HubError> {
        self.sender
            .send(ConnectionMessage::Frame { text })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Report a frame the transport could not accept.
    pub async fn reject(&self, reason: String) -> Result<(), HubError> {
        self.sender
            .send(ConnectionMessage::Rejected { reason })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Current binding, if joined.
    pub async fn binding(&self) -> Result<Option<ConnectionBinding>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionMessage::GetBinding { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: String,
    /// Identity authenticated by the host at upgrade time.
    user_id: String,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Sending half of this connection's outbound queue.
    outbound: ConnectionHandle,
    binding: Option<(ConnectionBinding, RoomActorHandle)>,
    ctx: ConnectionContext,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle, the receiving half of the outbound queue for the
    /// socket writer, and the task join handle.
    pub fn spawn(
        connection_id: String,
        user_id: String,
        ctx: ConnectionContext,
        cancel_token: CancellationToken,
    ) -> (
        ConnectionActorHandle,
        mpsc::Receiver<ServerEvent>,
        JoinHandle<()>,
    ) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::channel(ctx.queue_capacity.max(1));
        let outbound = ConnectionHandle::new(
            connection_id.clone(),
            outbound_tx,
            cancel_token.clone(),
            ctx.overflow_policy,
        );

        ctx.metrics.connection_created();

        let actor = Self {
            connection_id: connection_id.clone(),
            user_id,
            receiver,
            cancel_token: cancel_token.clone(),
            outbound,
            binding: None,
            mailbox: MailboxMonitor::new(ActorType::Connection, &connection_id),
            ctx,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, outbound_rx, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "hub.actor.connection",
        fields(connection_id = %self.connection_id, user_id = %self.user_id)
    )]
    async fn run(mut self) {
        info!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "hub.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.ctx.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "hub.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.leave().await;
        self.ctx.metrics.connection_closed();

        info!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: ConnectionMessage) {
        match message {
            ConnectionMessage::Frame { text } => {
                let started = Instant::now();
                match ClientEvent::decode(&text) {
                    Ok(event) => {
                        let name = event.name();
                        if let Err(e) = self.dispatch(event).await {
                            self.report(&e, Some(name));
                        }
                        record_message_latency(name, started.elapsed());
                    }
                    Err(e) => self.report(&e, None),
                }
            }

            ConnectionMessage::Rejected { reason } => {
                self.report(&HubError::Validation(reason), None);
            }

            ConnectionMessage::GetBinding { respond_to } => {
                let _ = respond_to.send(self.binding.as_ref().map(|(b, _)| b.clone()));
            }
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<(), HubError> {
        match event {
            ClientEvent::JoinRoom(join) => self.join(join).await,

            ClientEvent::LeaveRoom(leave) => {
                self.bound_room(&leave.session_id)?;
                self.leave().await;
                Ok(())
            }

            ClientEvent::VideoOffer(envelope) => self.relay(SignalKind::Offer, envelope).await,
            ClientEvent::VideoAnswer(envelope) => self.relay(SignalKind::Answer, envelope).await,
            ClientEvent::IceCandidate(envelope) => {
                self.relay(SignalKind::IceCandidate, envelope).await
            }

            ClientEvent::MediaStateChanged(e) => self.broadcast(RoomEvent::MediaState(e)).await,
            ClientEvent::HandRaiseChanged(e) => self.broadcast(RoomEvent::HandRaise(e)).await,
            ClientEvent::SendReaction(e) => self.broadcast(RoomEvent::Reaction(e)).await,
            ClientEvent::SendMessage(e) => self.broadcast(RoomEvent::Chat(e)).await,
            ClientEvent::ScreenShareStarted(e) => {
                self.broadcast(RoomEvent::ScreenShareStarted(e)).await
            }
            ClientEvent::ScreenShareStopped(e) => {
                self.broadcast(RoomEvent::ScreenShareStopped(e)).await
            }
        }
    }

    async fn join(&mut self, join: JoinRoom) -> Result<(), HubError> {
        join.validate()?;
        if join.user_id != self.user_id {
            return Err(HubError::PermissionDenied(
                "userId does not match the authenticated user".to_string(),
            ));
        }
        if let Some((binding, _)) = &self.binding {
            if binding.session_id != join.session_id {
                return Err(HubError::Conflict(
                    "Connection is already joined to another session".to_string(),
                ));
            }
        }

        let session = self.ctx.lifecycle.ensure_joinable(&join.session_id).await?;

        let participant = ParticipantInit {
            user_id: self.user_id.clone(),
            display_name: join.username.trim().to_string(),
            is_host: session.host_id == self.user_id,
        };
        let (room, outcome) = self
            .ctx
            .registry
            .join(
                join.session_id.clone(),
                participant,
                self.outbound.clone(),
                Utc::now(),
            )
            .await?;

        info!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            session_id = %join.session_id,
            join_kind = ?outcome.kind,
            roster_size = outcome.roster_size,
            "Joined room"
        );

        self.binding = Some((
            ConnectionBinding {
                connection_id: self.connection_id.clone(),
                session_id: join.session_id,
                user_id: self.user_id.clone(),
            },
            room,
        ));
        Ok(())
    }

    async fn relay(&self, kind: SignalKind, envelope: SignalEnvelope) -> Result<(), HubError> {
        let room = self.bound_room(&envelope.session_id)?;
        self.ensure_self(&envelope.from)?;
        room.relay(kind, envelope, self.connection_id.clone()).await
    }

    async fn broadcast(&self, event: RoomEvent) -> Result<(), HubError> {
        let room = self.bound_room(event.session_id())?;
        self.ensure_self(event.user_id())?;
        room.broadcast(event, self.connection_id.clone()).await
    }

    /// Room this connection is bound to, provided it is `session_id`.
    fn bound_room(&self, session_id: &str) -> Result<&RoomActorHandle, HubError> {
        match &self.binding {
            Some((binding, room)) if binding.session_id == session_id => Ok(room),
            _ => Err(HubError::Validation(
                "Connection has not joined this session".to_string(),
            )),
        }
    }

    fn ensure_self(&self, user_id: &str) -> Result<(), HubError> {
        if user_id == self.user_id {
            Ok(())
        } else {
            Err(HubError::PermissionDenied(
                "Events must be sent as the authenticated user".to_string(),
            ))
        }
    }

    /// Leave the bound room, if any.
    async fn leave(&mut self) {
        let Some((binding, room)) = self.binding.take() else {
            return;
        };

        match room
            .leave(binding.user_id, binding.connection_id, Utc::now())
            .await
        {
            Ok(removed) => {
                debug!(
                    target: "hub.actor.connection",
                    connection_id = %self.connection_id,
                    session_id = %binding.session_id,
                    removed = removed,
                    "Left room"
                );
            }
            Err(e) => {
                warn!(
                    target: "hub.actor.connection",
                    connection_id = %self.connection_id,
                    session_id = %binding.session_id,
                    error = %e,
                    "Room unavailable on leave"
                );
            }
        }
    }

    /// Report an error to this connection only.
    fn report(&self, error: &HubError, event: Option<&str>) {
        record_error(error.error_type_label());
        debug!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            event = event.unwrap_or("unknown"),
            error_code = error.error_code(),
            "Client event rejected"
        );
        self.outbound.deliver(ServerEvent::error(error, event));
    }
}
