//! Client transport.
//!
//! One WebSocket per client. The socket task only moves frames: inbound text
//! goes to the connection's `ConnectionActor`, and events from the
//! connection's outbound queue are written back. All protocol handling lives
//! in the actor.

pub mod ws;

pub use ws::ws_upgrade;
