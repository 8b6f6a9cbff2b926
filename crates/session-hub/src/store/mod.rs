//! Durable session storage.
//!
//! The hub talks to storage only through [`SessionStore`]. Every method is a
//! single-document operation that the backend must apply atomically; the hub
//! never needs a transaction spanning two sessions.
//!
//! # Backends
//!
//! - [`RedisSessionStore`] - production backend (Lua scripts for conditional updates)
//! - [`MemorySessionStore`] - in-process backend for local development and tests

pub mod lua_scripts;
pub mod memory;
pub mod redis;

pub use self::memory::MemorySessionStore;
pub use self::redis::RedisSessionStore;

use crate::errors::HubError;
use crate::models::{AttendanceRecord, Interval, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A session together with the version used for optimistic updates.
#[derive(Debug, Clone)]
pub struct VersionedSession {
    pub session: Session,
    pub version: u64,
}

/// Storage seam for session records and attendance.
///
/// `Session::participants` returned by reads reflects the participant set
/// maintained by [`SessionStore::add_participant`]; writers do not need to
/// carry it through `update_session`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with `Conflict` if the id exists.
    async fn insert_session(&self, session: &Session) -> Result<(), HubError>;

    /// Fetch a session and its current version.
    async fn get_session(&self, session_id: &str) -> Result<Option<VersionedSession>, HubError>;

    /// Replace a session if its version still equals `expected_version`.
    ///
    /// Returns the new version, or `Conflict` when another writer got there first.
    async fn update_session(&self, session: &Session, expected_version: u64)
        -> Result<u64, HubError>;

    /// Delete a session and all its attendance. Returns whether it existed.
    async fn delete_session(&self, session_id: &str) -> Result<bool, HubError>;

    /// All stored sessions, in no particular order.
    async fn list_sessions(&self) -> Result<Vec<Session>, HubError>;

    /// Add a user to the durable participants set. Returns whether it was new.
    async fn add_participant(&self, session_id: &str, user_id: &str) -> Result<bool, HubError>;

    /// Append an open interval unless one is already open.
    ///
    /// Returns `true` if a new interval was opened.
    async fn open_interval(
        &self,
        session_id: &str,
        user_id: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<bool, HubError>;

    /// Close the open interval, if any, and return it.
    async fn close_interval(
        &self,
        session_id: &str,
        user_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<Option<Interval>, HubError>;

    /// Set the manual attendance status without touching intervals.
    async fn set_attendance_status(
        &self,
        session_id: &str,
        user_id: &str,
        status: &str,
        display_name: Option<&str>,
    ) -> Result<(), HubError>;

    /// Every attendance record for a session.
    async fn attendance(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, HubError>;

    /// Round-trip to the backend. Used by the readiness endpoint.
    async fn ping(&self) -> Result<(), HubError>;
}
