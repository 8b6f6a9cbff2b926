//! `RoomActor` - per-session actor that owns the live roster.
//!
//! Each `RoomActor`:
//! - Is the only writer of its session's roster
//! - Serializes joins, leaves, signaling and state broadcasts for the room
//! - Delivers to peers with `try_send` so a slow peer never stalls the room
//! - Feeds presence changes to its `AttendanceRecorder`
//!
//! # Reconnects
//!
//! A join for a user already in the room replaces the row's connection
//! handle. The old connection receives `session-superseded` and is asked to
//! close. Its later teardown is ignored because it no longer owns the row.
//!
//! # Idle Collection
//!
//! Once the roster has been empty for the idle timeout the room reports
//! itself to the registry, which then asks it to stop. The stop request is
//! honored only if the room is still empty, so a join queued ahead of it
//! always wins.

use crate::errors::HubError;
use crate::signaling::broadcast::{self, Audience, RoomEvent};
use crate::signaling::protocol::{
    ParticipantView, ServerEvent, SessionSuperseded, SignalEnvelope, SignalKind, UserLeft,
};
use crate::signaling::relay;
use crate::store::SessionStore;

use super::messages::{IdleNotice, JoinKind, JoinOutcome, RoomJoin, RoomMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::recorder::{AttendanceCommand, AttendanceRecorder, RecorderHandle};
use super::roster::{Roster, Upsert};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How often an empty room checks its idle deadline.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// How long a stopping room waits for its recorder to drain.
const RECORDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every room.
#[derive(Clone)]
pub struct RoomSettings {
    pub store: Arc<dyn SessionStore>,
    /// How long an empty room is kept for reconnects.
    pub idle_timeout: Duration,
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    session_id: String,
}

impl RoomActorHandle {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue a join. The outcome arrives on the join's own reply channel.
    pub(crate) async fn enqueue_join(&self, join: RoomJoin) -> Result<(), HubError> {
        self.sender
            .send(RoomMessage::Join(join))
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Remove `user_id` if `connection_id` is still its current connection.
    ///
    /// Returns `true` if the row was removed.
    pub async fn leave(
        &self,
        user_id: String,
        connection_id: String,
        left_at: DateTime<Utc>,
    ) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                user_id,
                connection_id,
                left_at,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Relay a signaling envelope (fire-and-forget).
    pub async fn relay(
        &self,
        kind: SignalKind,
        envelope: SignalEnvelope,
        connection_id: String,
    ) -> Result<(), HubError> {
        self.sender
            .send(RoomMessage::Relay {
                kind,
                envelope,
                connection_id,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Broadcast a state event (fire-and-forget).
    pub async fn broadcast(&self, event: RoomEvent, connection_id: String) -> Result<(), HubError> {
        self.sender
            .send(RoomMessage::Broadcast {
                event,
                connection_id,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Ordered live roster.
    pub async fn roster(&self) -> Result<Vec<ParticipantView>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetRoster { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Connection id currently bound to `user_id`.
    pub async fn resolve_handle(&self, user_id: String) -> Result<Option<String>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::ResolveHandle {
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Wait for attendance writes queued so far to land.
    ///
    /// The room keeps serving other messages while the flush is pending.
    pub async fn sync_attendance(&self) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::SyncAttendance { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the room if it is empty. Returns whether it stopped.
    pub(crate) async fn shutdown_if_empty(&self) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::ShutdownIfEmpty { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    session_id: String,
    /// Distinguishes this room from earlier rooms for the same session.
    generation: u64,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    roster: Roster,
    recorder: Option<(RecorderHandle, JoinHandle<()>)>,
    idle_tx: mpsc::Sender<IdleNotice>,
    idle_timeout: Duration,
    /// When the roster last became empty.
    empty_since: Option<Instant>,
    idle_reported: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// `predecessor` is the teardown of an earlier room for the same session;
    /// this room's attendance writes wait for it.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session_id: String,
        generation: u64,
        settings: &RoomSettings,
        idle_tx: mpsc::Sender<IdleNotice>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        predecessor: Option<JoinHandle<()>>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let recorder = AttendanceRecorder::spawn(
            session_id.clone(),
            Arc::clone(&settings.store),
            predecessor,
        );

        let actor = Self {
            session_id: session_id.clone(),
            generation,
            receiver,
            cancel_token: cancel_token.clone(),
            roster: Roster::new(),
            recorder: Some(recorder),
            idle_tx,
            idle_timeout: settings.idle_timeout,
            empty_since: Some(Instant::now()),
            idle_reported: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &session_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "hub.actor.room", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "hub.actor.room",
            session_id = %self.session_id,
            generation = self.generation,
            "RoomActor started"
        );

        let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "hub.actor.room",
                        session_id = %self.session_id,
                        "RoomActor received cancellation signal"
                    );
                    self.close_all_intervals();
                    break;
                }

                _ = idle_check.tick() => {
                    self.check_idle();
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let stop = self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if stop {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "hub.actor.room",
                                session_id = %self.session_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.close_all_intervals();
                            break;
                        }
                    }
                }
            }
        }

        self.drain_recorder().await;

        info!(
            target: "hub.actor.room",
            session_id = %self.session_id,
            participants = self.roster.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Returns `true` when the room should stop.
    fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Join(join) => {
                let RoomJoin {
                    participant,
                    connection,
                    joined_at,
                    respond_to,
                } = join;
                let user_id = participant.user_id.clone();

                let kind = match self.roster.upsert(participant, connection, joined_at) {
                    Upsert::Added => JoinKind::New,
                    Upsert::Superseded(old) => {
                        old.deliver(ServerEvent::SessionSuperseded(SessionSuperseded {
                            session_id: self.session_id.clone(),
                        }));
                        old.disconnect();
                        info!(
                            target: "hub.actor.room",
                            session_id = %self.session_id,
                            user_id = %user_id,
                            old_connection_id = %old.connection_id(),
                            "Connection superseded by reconnect"
                        );
                        JoinKind::Reconnected
                    }
                    Upsert::Refreshed => JoinKind::Refreshed,
                };

                self.announce_join(&user_id, kind);
                self.empty_since = None;
                self.idle_reported = false;
                self.record(AttendanceCommand::Joined {
                    user_id,
                    at: joined_at,
                });

                let _ = respond_to.send(Ok(JoinOutcome {
                    kind,
                    roster_size: self.roster.len(),
                }));
            }

            RoomMessage::Leave {
                user_id,
                connection_id,
                left_at,
                respond_to,
            } => {
                let removed = self.handle_leave(&user_id, &connection_id, left_at);
                let _ = respond_to.send(removed);
            }

            RoomMessage::Relay {
                kind,
                envelope,
                connection_id,
            } => {
                self.handle_relay(kind, envelope, &connection_id);
            }

            RoomMessage::Broadcast {
                event,
                connection_id,
            } => {
                self.handle_broadcast(event, &connection_id);
            }

            RoomMessage::GetRoster { respond_to } => {
                let _ = respond_to.send(self.roster.views());
            }

            RoomMessage::ResolveHandle {
                user_id,
                respond_to,
            } => {
                let connection_id = self
                    .roster
                    .resolve(&user_id)
                    .map(|c| c.connection_id().to_string());
                let _ = respond_to.send(connection_id);
            }

            RoomMessage::SyncAttendance { respond_to } => {
                // The flush waits on the store; answer from outside the loop.
                let recorder = self.recorder.as_ref().map(|(r, _)| r.clone());
                let session_id = self.session_id.clone();
                tokio::spawn(async move {
                    if let Some(recorder) = recorder {
                        if let Err(e) = recorder.flush().await {
                            warn!(
                                target: "hub.actor.room",
                                session_id = %session_id,
                                error = %e,
                                "Attendance flush failed"
                            );
                        }
                    }
                    let _ = respond_to.send(());
                });
            }

            RoomMessage::ShutdownIfEmpty { respond_to } => {
                let stop = self.roster.is_empty();
                let _ = respond_to.send(stop);
                if stop {
                    debug!(
                        target: "hub.actor.room",
                        session_id = %self.session_id,
                        "Empty room stopping"
                    );
                }
                return stop;
            }
        }
        false
    }

    /// Send the roster to the joiner and presence to everyone else.
    fn announce_join(&self, user_id: &str, kind: JoinKind) {
        let Some(joiner) = self.roster.get(user_id) else {
            return;
        };

        if kind != JoinKind::Refreshed {
            let presence = ServerEvent::UserJoined(joiner.view());
            let notified = broadcast::fan_out(&self.roster, user_id, &presence, Audience::Others);
            debug!(
                target: "hub.actor.room",
                session_id = %self.session_id,
                user_id = %user_id,
                notified = notified,
                "Participant joined"
            );
        }

        joiner
            .connection
            .deliver(ServerEvent::ParticipantList(self.roster.views()));
    }

    fn handle_leave(&mut self, user_id: &str, connection_id: &str, left_at: DateTime<Utc>) -> bool {
        let Some(participant) = self.roster.remove_if_current(user_id, connection_id) else {
            debug!(
                target: "hub.actor.room",
                session_id = %self.session_id,
                user_id = %user_id,
                connection_id = %connection_id,
                "Leave from non-current connection ignored"
            );
            return false;
        };

        let left = ServerEvent::UserLeft(UserLeft {
            session_id: self.session_id.clone(),
            user_id: participant.user_id.clone(),
        });
        broadcast::fan_out(&self.roster, user_id, &left, Audience::Others);

        self.record(AttendanceCommand::Left {
            user_id: participant.user_id,
            at: left_at,
        });

        if self.roster.is_empty() {
            self.empty_since = Some(Instant::now());
            self.idle_reported = false;
        }

        info!(
            target: "hub.actor.room",
            session_id = %self.session_id,
            user_id = %user_id,
            remaining = self.roster.len(),
            "Participant left"
        );
        true
    }

    fn handle_relay(&self, kind: SignalKind, envelope: SignalEnvelope, connection_id: &str) {
        let from = envelope.from.clone();
        let Some(sender) = self.roster.resolve(&from).cloned() else {
            debug!(
                target: "hub.actor.room",
                session_id = %self.session_id,
                connection_id = %connection_id,
                "Signal from user not in room dropped"
            );
            return;
        };
        if sender.connection_id() != connection_id {
            debug!(
                target: "hub.actor.room",
                session_id = %self.session_id,
                connection_id = %connection_id,
                "Signal from superseded connection dropped"
            );
            return;
        }

        if let Err(e) = relay::relay(&self.roster, kind, envelope) {
            debug!(
                target: "hub.actor.room",
                session_id = %self.session_id,
                signal = kind.as_str(),
                error = %e,
                "Signal undeliverable"
            );
            sender.deliver(ServerEvent::error(&e, Some(kind.as_str())));
        }
    }

    fn handle_broadcast(&mut self, event: RoomEvent, connection_id: &str) {
        let user_id = event.user_id().to_string();
        if !self.roster.is_current(&user_id, connection_id) {
            debug!(
                target: "hub.actor.room",
                session_id = %self.session_id,
                connection_id = %connection_id,
                "Broadcast from non-current connection dropped"
            );
            return;
        }

        let audience = event.audience();
        let out = broadcast::apply(&mut self.roster, event);
        broadcast::fan_out(&self.roster, &user_id, &out, audience);
    }

    /// Report idleness to the registry once the timeout has elapsed.
    fn check_idle(&mut self) {
        let Some(since) = self.empty_since else {
            return;
        };
        if self.idle_reported || since.elapsed() < self.idle_timeout {
            return;
        }

        let notice = IdleNotice {
            session_id: self.session_id.clone(),
            generation: self.generation,
        };
        match self.idle_tx.try_send(notice) {
            Ok(()) => {
                self.idle_reported = true;
                debug!(
                    target: "hub.actor.room",
                    session_id = %self.session_id,
                    "Room idle, reported to registry"
                );
            }
            Err(e) => {
                // Retried on the next tick.
                debug!(
                    target: "hub.actor.room",
                    session_id = %self.session_id,
                    error = %e,
                    "Idle report not delivered"
                );
            }
        }
    }

    fn record(&self, command: AttendanceCommand) {
        if let Some((recorder, _)) = &self.recorder {
            recorder.record(command);
        }
    }

    /// Close every member's interval at shutdown.
    fn close_all_intervals(&mut self) {
        let now = Utc::now();
        let members: Vec<String> = self.roster.drain().map(|p| p.user_id).collect();
        for user_id in members {
            self.record(AttendanceCommand::Left { user_id, at: now });
        }
    }

    async fn drain_recorder(&mut self) {
        let Some((recorder, task_handle)) = self.recorder.take() else {
            return;
        };
        drop(recorder);

        match tokio::time::timeout(RECORDER_DRAIN_TIMEOUT, task_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    target: "hub.actor.room",
                    session_id = %self.session_id,
                    error = ?e,
                    "Attendance recorder panicked"
                );
            }
            Err(_) => {
                warn!(
                    target: "hub.actor.room",
                    session_id = %self.session_id,
                    "Attendance recorder drain timed out"
                );
            }
        }
    }
}
