//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use super::room::RoomActorHandle;
use super::roster::ParticipantInit;
use crate::errors::HubError;
use crate::signaling::broadcast::RoomEvent;
use crate::signaling::protocol::{ParticipantView, SignalEnvelope, SignalKind};
use crate::signaling::ConnectionHandle;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Route a join to the session's room, creating the room if needed.
    Join {
        session_id: String,
        join: RoomJoin,
        /// Receives the room handle once the join is queued in the room.
        respond_to: oneshot::Sender<Result<RoomActorHandle, HubError>>,
    },

    /// Live roster of a session; empty when no room exists.
    GetRoster {
        session_id: String,
        respond_to: oneshot::Sender<Result<Vec<ParticipantView>, HubError>>,
    },

    /// Current connection id for a user in a session.
    ResolveHandle {
        session_id: String,
        user_id: String,
        respond_to: oneshot::Sender<Result<Option<String>, HubError>>,
    },

    /// Wait until the room's queued attendance writes have landed.
    SyncAttendance {
        session_id: String,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// Get current registry status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting joins and cancel every room (SIGTERM received).
    Shutdown {
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A connection joins (or rejoins) the room.
    Join(RoomJoin),

    /// A connection leaves, explicitly or by disconnecting.
    Leave {
        user_id: String,
        connection_id: String,
        left_at: DateTime<Utc>,
        /// `true` if the user's row was removed.
        respond_to: oneshot::Sender<bool>,
    },

    /// Relay a signaling envelope from `connection_id`.
    Relay {
        kind: SignalKind,
        envelope: SignalEnvelope,
        connection_id: String,
    },

    /// Apply and fan out a state event from `connection_id`.
    Broadcast {
        event: RoomEvent,
        connection_id: String,
    },

    GetRoster {
        respond_to: oneshot::Sender<Vec<ParticipantView>>,
    },

    ResolveHandle {
        user_id: String,
        respond_to: oneshot::Sender<Option<String>>,
    },

    /// Flush the attendance recorder.
    SyncAttendance { respond_to: oneshot::Sender<()> },

    /// Stop if the room is still empty. Replies whether it stopped.
    ShutdownIfEmpty { respond_to: oneshot::Sender<bool> },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// One text frame read from the socket.
    Frame { text: String },

    /// A frame the transport rejected before decoding (binary, oversized).
    Rejected { reason: String },

    /// Current binding, if the connection has joined a room.
    GetBinding {
        respond_to: oneshot::Sender<Option<ConnectionBinding>>,
    },
}

/// A join travelling from a connection through the registry to a room.
#[derive(Debug)]
pub struct RoomJoin {
    pub participant: ParticipantInit,
    pub connection: ConnectionHandle,
    pub joined_at: DateTime<Utc>,
    pub respond_to: oneshot::Sender<Result<JoinOutcome, HubError>>,
}

/// How a join changed the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// First live connection for this user.
    New,
    /// Replaced the user's previous connection.
    Reconnected,
    /// Same connection joined again.
    Refreshed,
}

/// Result of a room join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub kind: JoinKind,
    pub roster_size: usize,
}

/// Explicit record of which room a connection speaks for.
///
/// Created at join time and owned by the connection actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBinding {
    pub connection_id: String,
    pub session_id: String,
    pub user_id: String,
}

/// A room reporting that it has been empty for the idle timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleNotice {
    pub session_id: String,
    /// Distinguishes a collected room from a later room for the same session.
    pub generation: u64,
}

/// Registry status (for health checks and the live API).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
