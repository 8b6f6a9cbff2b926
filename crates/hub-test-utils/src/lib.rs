//! # Hub Test Utilities
//!
//! Shared test utilities for the session hub.
//!
//! This crate provides:
//! - `fixtures` - Test configuration and `TestSession` builders
//! - `flaky_store` - `FlakyStore`, a store wrapper with switchable failures
//! - `outbound` - Helpers for reading outbound events with timeouts
//! - `server_harness` - `TestHubServer` for E2E tests, plus a WebSocket client
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestHubServer::spawn().await?;
//!     let session = TestSession::new("Compilers")
//!         .host("prof-1")
//!         .ongoing()
//!         .insert(server.store().as_ref())
//!         .await;
//!
//!     let mut alice = server.connect("alice").await?;
//!     alice.join(&session.id, "alice", "Alice").await?;
//!     let list = alice.next_named("participant-list").await?;
//!     assert_eq!(list["data"].as_array().map(Vec::len), Some(1));
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod flaky_store;
pub mod outbound;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use flaky_store::*;
pub use outbound::*;
pub use server_harness::*;
