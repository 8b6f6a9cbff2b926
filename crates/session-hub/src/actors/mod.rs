//! Actor model implementation for the live path.
//!
//! ```text
//! RoomRegistryActor (singleton per hub instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live session)
//!         ├── owns the roster
//!         └── AttendanceRecorder (FIFO persistence queue)
//! ConnectionActor (one per WebSocket connection)
//! └── owns the ConnectionBinding and the outbound queue
//! ```
//!
//! # Key Design Decisions
//!
//! - **Actor per room**: every roster mutation and every broadcast for a
//!   session passes through one mailbox, so per-room order is total
//! - **Non-blocking delivery**: rooms `try_send` into bounded per-connection
//!   queues; overflow drops or disconnects per the configured policy
//! - **CancellationToken propagation**: rooms and connections hold child
//!   tokens of the registry's root token
//! - **Mailbox monitoring**: depth thresholds with metrics (Room: 100/500, Connection: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` singleton that owns every room
//! - [`room`] - `RoomActor` per live session
//! - [`roster`] - Ordered, user-unique participant list
//! - [`recorder`] - Per-room attendance persistence queue
//! - [`connection`] - `ConnectionActor` per WebSocket connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod recorder;
pub mod registry;
pub mod room;
pub mod roster;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle, ConnectionContext};
pub use messages::*;
pub use metrics::{ActorMetrics, MailboxMonitor};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle, RoomSettings};
pub use roster::{Participant, ParticipantInit, Roster};
