//! Session Hub Library
//!
//! Core of the live session hub: a WebSocket signaling server that tracks who
//! is present in each live session, relays WebRTC negotiation between peers,
//! broadcasts room state, gates entry on the session lifecycle, and records
//! attendance durably.
//!
//! - Live rosters per session, one room per session id
//! - Directed (`to`) and room-wide WebRTC signaling relay
//! - Media, hand-raise, reaction, chat and screen-share broadcasts
//! - `Scheduled -> Ongoing -> Ended | Cancelled` lifecycle with join gating
//! - Interval-based attendance with host overrides and watched counts
//! - HTTP management API next to the WebSocket endpoint
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton per hub instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live session)
//!         ├── owns the roster
//!         └── AttendanceRecorder (FIFO persistence queue)
//! ConnectionActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Reconnect supersedes**: a user appears at most once per room; a new
//!   connection replaces the old handle and the old socket is closed
//! - **Resolve at delivery**: directed signals are routed to the recipient's
//!   current handle when the room processes them
//! - **Live path never waits on storage**: attendance writes are queued per
//!   room and failures are logged, not rolled back
//!
//! # Modules
//!
//! - [`actors`] - Registry, room, connection and recorder actors
//! - [`signaling`] - Wire protocol, relay and broadcast
//! - [`lifecycle`] - Session management and the status state machine
//! - [`attendance`] - Attendance ledger
//! - [`store`] - Session storage (Redis, in-memory)
//! - [`transport`] - WebSocket upgrade and socket loop
//! - [`routes`] / [`handlers`] / [`middleware`] - HTTP surface
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing codes
//! - [`observability`] - Metrics and health endpoints

pub mod actors;
pub mod attendance;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod signaling;
pub mod store;
pub mod transport;
