//! `RoomRegistryActor` - singleton owner of every live room.
//!
//! The `RoomRegistryActor` is the top-level actor in the hub hierarchy:
//!
//! - Singleton per hub instance
//! - Creates a `RoomActor` on the first join for a session
//! - Routes joins and roster queries to rooms
//! - Collects rooms that stayed empty for the idle timeout, and hands a
//!   still-draining room to the next room for that session
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors room actor health (panic detection via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the registry:
//! 1. Stops accepting joins
//! 2. Cancels the root `CancellationToken` (propagates to rooms and connections)
//! 3. Waits for room tasks with a timeout

use crate::errors::HubError;
use crate::signaling::protocol::ParticipantView;
use crate::signaling::ConnectionHandle;

use super::messages::{
    IdleNotice, JoinOutcome, RegistryMessage, RegistryStatus, RoomJoin,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomSettings};
use super::roster::ParticipantInit;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Buffer for idle notices from rooms.
const IDLE_CHANNEL_BUFFER: usize = 256;

/// How long a collected room gets to finish its attendance writes.
const ROOM_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the `RoomRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(hub_id: String, settings: RoomSettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(
            hub_id,
            receiver,
            cancel_token.clone(),
            settings,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Join `participant` to the session's room over `connection`.
    ///
    /// Creates the room if needed. Returns the room handle for later
    /// room-scoped traffic, and what the join did to the roster.
    pub async fn join(
        &self,
        session_id: String,
        participant: ParticipantInit,
        connection: ConnectionHandle,
        joined_at: DateTime<Utc>,
    ) -> Result<(RoomActorHandle, JoinOutcome), HubError> {
        let (join_tx, join_rx) = oneshot::channel();
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Join {
                session_id,
                join: RoomJoin {
                    participant,
                    connection,
                    joined_at,
                    respond_to: join_tx,
                },
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        let room = rx
            .await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))??;

        let outcome = join_rx
            .await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))??;

        Ok((room, outcome))
    }

    /// Live roster of `session_id`, in join order. Empty if no room is live.
    pub async fn roster(&self, session_id: String) -> Result<Vec<ParticipantView>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoster {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Connection id currently bound to `user_id` in `session_id`.
    pub async fn resolve_handle(
        &self,
        session_id: String,
        user_id: String,
    ) -> Result<Option<String>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ResolveHandle {
                session_id,
                user_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Wait until attendance writes queued by the session's room have landed.
    pub async fn sync_attendance(&self, session_id: String) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::SyncAttendance {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current registry status.
    pub async fn status(&self) -> Result<RegistryStatus, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the registry task is still receiving messages.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Get a child token for actors that must stop with the hub.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    generation: u64,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    hub_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    rooms: HashMap<String, ManagedRoom>,
    /// Teardown tasks of collected rooms, by session id.
    draining: HashMap<String, JoinHandle<()>>,
    settings: RoomSettings,
    idle_tx: mpsc::Sender<IdleNotice>,
    idle_rx: mpsc::Receiver<IdleNotice>,
    next_generation: u64,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    fn new(
        hub_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        settings: RoomSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &hub_id);
        let (idle_tx, idle_rx) = mpsc::channel(IDLE_CHANNEL_BUFFER);

        Self {
            hub_id,
            receiver,
            cancel_token,
            rooms: HashMap::new(),
            draining: HashMap::new(),
            settings,
            idle_tx,
            idle_rx,
            next_generation: 1,
            accepting_new: true,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "hub.actor.registry", fields(hub_id = %self.hub_id))]
    async fn run(mut self) {
        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            "RoomRegistryActor started"
        );

        loop {
            // Check for terminated room actors
            self.check_room_health().await;

            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "hub.actor.registry",
                        hub_id = %self.hub_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                Some(notice) = self.idle_rx.recv() => {
                    self.collect_idle_room(notice).await;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "hub.actor.registry",
                                hub_id = %self.hub_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Join {
                session_id,
                join,
                respond_to,
            } => {
                let result = self.route_join(session_id, join).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoster {
                session_id,
                respond_to,
            } => {
                // Rooms answer through their own mailboxes; the registry
                // only hands out the handle.
                let room = self.rooms.get(&session_id).map(|m| m.handle.clone());
                tokio::spawn(async move {
                    let result = match room {
                        Some(room) => room.roster().await,
                        None => Ok(Vec::new()),
                    };
                    let _ = respond_to.send(result);
                });
            }

            RegistryMessage::ResolveHandle {
                session_id,
                user_id,
                respond_to,
            } => {
                let room = self.rooms.get(&session_id).map(|m| m.handle.clone());
                tokio::spawn(async move {
                    let result = match room {
                        Some(room) => room.resolve_handle(user_id).await,
                        None => Ok(None),
                    };
                    let _ = respond_to.send(result);
                });
            }

            RegistryMessage::SyncAttendance {
                session_id,
                respond_to,
            } => {
                let room = self.rooms.get(&session_id).map(|m| m.handle.clone());
                tokio::spawn(async move {
                    let result = match room {
                        Some(room) => room.sync_attendance().await,
                        None => Ok(()),
                    };
                    let _ = respond_to.send(result);
                });
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown { respond_to } => {
                info!(
                    target: "hub.actor.registry",
                    hub_id = %self.hub_id,
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    /// Queue `join` in the session's room, creating the room if needed.
    async fn route_join(
        &mut self,
        session_id: String,
        join: RoomJoin,
    ) -> Result<RoomActorHandle, HubError> {
        if !self.accepting_new {
            return Err(HubError::Draining);
        }

        let room = match self.rooms.get(&session_id) {
            Some(managed) => managed.handle.clone(),
            None => self.create_room(session_id),
        };

        room.enqueue_join(join).await?;
        Ok(room)
    }

    fn create_room(&mut self, session_id: String) -> RoomActorHandle {
        let generation = self.next_generation;
        self.next_generation += 1;

        let predecessor = self
            .draining
            .remove(&session_id)
            .filter(|teardown| !teardown.is_finished());
        if predecessor.is_some() {
            debug!(
                target: "hub.actor.registry",
                session_id = %session_id,
                generation = generation,
                "Previous room still draining; new room writes will wait"
            );
        }

        let (handle, task_handle) = RoomActor::spawn(
            session_id.clone(),
            generation,
            &self.settings,
            self.idle_tx.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
            predecessor,
        );

        self.rooms.insert(
            session_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                generation,
            },
        );
        self.metrics.room_created();

        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            session_id = %session_id,
            generation = generation,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        handle
    }

    /// Stop and forget a room that reported itself idle, if it is still empty.
    async fn collect_idle_room(&mut self, notice: IdleNotice) {
        let Some(managed) = self.rooms.get(&notice.session_id) else {
            return;
        };
        if managed.generation != notice.generation {
            debug!(
                target: "hub.actor.registry",
                session_id = %notice.session_id,
                "Stale idle notice ignored"
            );
            return;
        }

        match managed.handle.shutdown_if_empty().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    target: "hub.actor.registry",
                    session_id = %notice.session_id,
                    "Idle room repopulated, keeping it"
                );
                return;
            }
            Err(e) => {
                // Left to the health check.
                warn!(
                    target: "hub.actor.registry",
                    session_id = %notice.session_id,
                    error = %e,
                    "Idle room did not answer stop request"
                );
                return;
            }
        }

        let Some(managed) = self.rooms.remove(&notice.session_id) else {
            return;
        };

        // Don't block the message loop on the room's final flush. A room
        // created for this session before it ends waits on this task.
        let session_id = notice.session_id.clone();
        let hub_id = self.hub_id.clone();
        let teardown = tokio::spawn(async move {
            match tokio::time::timeout(ROOM_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "hub.actor.registry",
                        hub_id = %hub_id,
                        session_id = %session_id,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "hub.actor.registry",
                        hub_id = %hub_id,
                        session_id = %session_id,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "hub.actor.registry",
                        hub_id = %hub_id,
                        session_id = %session_id,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });
        self.draining.insert(notice.session_id.clone(), teardown);

        self.metrics.room_removed();

        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            session_id = %notice.session_id,
            total_rooms = self.rooms.len(),
            "Idle room collected"
        );
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for (session_id, managed) in &self.rooms {
            debug!(
                target: "hub.actor.registry",
                hub_id = %self.hub_id,
                session_id = %session_id,
                "Cancelling room actor"
            );
            managed.handle.cancel();
        }

        for (session_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(Duration::from_secs(30), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "hub.actor.registry",
                        hub_id = %self.hub_id,
                        session_id = %session_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "hub.actor.registry",
                        hub_id = %self.hub_id,
                        session_id = %session_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "hub.actor.registry",
                        hub_id = %self.hub_id,
                        session_id = %session_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        // Rooms collected earlier may still be writing attendance.
        for (session_id, teardown) in self.draining.drain() {
            if let Err(e) = teardown.await {
                warn!(
                    target: "hub.actor.registry",
                    hub_id = %self.hub_id,
                    session_id = %session_id,
                    error = ?e,
                    "Room teardown failed during shutdown"
                );
            }
        }

        info!(
            target: "hub.actor.registry",
            hub_id = %self.hub_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        self.draining.retain(|_, teardown| !teardown.is_finished());

        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(session_id, _)| session_id.clone())
            .collect();

        for session_id in finished {
            let Some(managed) = self.rooms.remove(&session_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "hub.actor.registry",
                        hub_id = %self.hub_id,
                        session_id = %session_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "hub.actor.registry",
                            hub_id = %self.hub_id,
                            session_id = %session_id,
                            error = ?join_error,
                            "Room actor panicked - live roster lost"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::JoinKind;
    use crate::config::OverflowPolicy;
    use crate::models::CreateSessionRequest;
    use crate::signaling::protocol::ServerEvent;
    use crate::store::{MemorySessionStore, SessionStore};

    async fn registry(idle_timeout: Duration) -> (RoomRegistryHandle, Arc<dyn SessionStore>) {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        for id in ["s-1", "s-2"] {
            let now = Utc::now();
            let (session, _) = CreateSessionRequest {
                title: format!("Session {id}"),
                start_time: Some(now),
                ..Default::default()
            }
            .into_session(id.to_string(), "host".to_string(), now)
            .unwrap();
            store.insert_session(&session).await.unwrap();
        }

        let handle = RoomRegistryHandle::new(
            "hub-test".to_string(),
            RoomSettings {
                store: Arc::clone(&store),
                idle_timeout,
            },
            ActorMetrics::new(),
        );
        (handle, store)
    }

    fn connection(id: &str) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (
            ConnectionHandle::new(id, tx, CancellationToken::new(), OverflowPolicy::Drop),
            rx,
        )
    }

    fn participant(user: &str) -> ParticipantInit {
        ParticipantInit {
            user_id: user.to_string(),
            display_name: user.to_string(),
            is_host: false,
        }
    }

    #[tokio::test]
    async fn test_join_creates_room_once() {
        let (registry, _store) = registry(Duration::from_secs(30)).await;
        let (a, _rx_a) = connection("c-a");
        let (b, _rx_b) = connection("c-b");

        let (room, outcome) = registry
            .join("s-1".to_string(), participant("a"), a, Utc::now())
            .await
            .unwrap();
        assert_eq!(room.session_id(), "s-1");
        assert_eq!(outcome.kind, JoinKind::New);

        registry
            .join("s-1".to_string(), participant("b"), b, Utc::now())
            .await
            .unwrap();

        let status = registry.status().await.unwrap();
        assert_eq!(status.room_count, 1);
        assert!(!status.is_draining);

        let roster = registry.roster("s-1".to_string()).await.unwrap();
        assert_eq!(roster.len(), 2);
        assert!(registry.roster("s-2".to_string()).await.unwrap().is_empty());

        registry.cancel();
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let (registry, _store) = registry(Duration::from_secs(30)).await;
        let (a, mut rx_a) = connection("c-a");
        let (b, _rx_b) = connection("c-b");

        registry
            .join("s-1".to_string(), participant("a"), a, Utc::now())
            .await
            .unwrap();
        registry
            .join("s-2".to_string(), participant("b"), b, Utc::now())
            .await
            .unwrap();

        assert!(matches!(rx_a.recv().await.unwrap(), ServerEvent::ParticipantList(_)));
        assert!(rx_a.try_recv().is_err());
        assert_eq!(
            registry
                .resolve_handle("s-2".to_string(), "a".to_string())
                .await
                .unwrap(),
            None
        );
        assert_eq!(registry.status().await.unwrap().room_count, 2);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_concurrent_joins_are_all_reflected() {
        let (registry, store) = registry(Duration::from_secs(30)).await;

        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for i in 0..20 {
            let (conn, rx) = connection(&format!("c-{i}"));
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .join(
                        "s-1".to_string(),
                        participant(&format!("u-{i}")),
                        conn,
                        Utc::now(),
                    )
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.roster("s-1".to_string()).await.unwrap().len(), 20);
        registry.sync_attendance("s-1".to_string()).await.unwrap();
        let records = store.attendance("s-1").await.unwrap();
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| r.open_interval_count() == 1));

        registry.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_room_is_collected() {
        let (registry, _store) = registry(Duration::from_secs(30)).await;
        let (a, _rx) = connection("c-a");

        let (room, _) = registry
            .join("s-1".to_string(), participant("a"), a, Utc::now())
            .await
            .unwrap();
        room.leave("a".to_string(), "c-a".to_string(), Utc::now())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.status().await.unwrap().room_count, 1);

        tokio::time::advance(Duration::from_secs(15)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.status().await.unwrap().room_count, 0);

        // A later join gets a fresh room.
        let (b, _rx_b) = connection("c-b");
        let (_, outcome) = registry
            .join("s-1".to_string(), participant("b"), b, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.roster_size, 1);
        assert_eq!(registry.status().await.unwrap().room_count, 1);

        registry.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_idle_window_keeps_room() {
        let (registry, _store) = registry(Duration::from_secs(30)).await;
        let (a1, _rx1) = connection("c-a1");

        let (room, _) = registry
            .join("s-1".to_string(), participant("a"), a1, Utc::now())
            .await
            .unwrap();
        room.leave("a".to_string(), "c-a1".to_string(), Utc::now())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        let (a2, _rx2) = connection("c-a2");
        registry
            .join("s-1".to_string(), participant("a"), a2, Utc::now())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.status().await.unwrap().room_count, 1);
        assert_eq!(registry.roster("s-1".to_string()).await.unwrap().len(), 1);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_joins() {
        let (registry, _store) = registry(Duration::from_secs(30)).await;
        let (a, _rx) = connection("c-a");
        registry
            .join("s-1".to_string(), participant("a"), a, Utc::now())
            .await
            .unwrap();

        let child = registry.child_token();
        registry.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.is_cancelled());
        assert!(child.is_cancelled());

        let (b, _rx_b) = connection("c-b");
        assert!(registry
            .join("s-1".to_string(), participant("b"), b, Utc::now())
            .await
            .is_err());
    }
}
