//! Store wrapper with switchable failures.
//!
//! Wraps a real [`SessionStore`] and fails selected groups of operations
//! with `HubError::Store` while a switch is on. Used to show that the live
//! path keeps working while persistence is down. Attendance writes can also
//! be slowed down to stand in for a congested backend.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = FlakyStore::new(Arc::new(MemorySessionStore::new()));
//! store.fail_attendance_writes(true);
//! // joins still update the roster; interval writes are logged and counted
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use session_hub::errors::HubError;
use session_hub::models::{AttendanceRecord, Interval, Session};
use session_hub::store::{SessionStore, VersionedSession};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A [`SessionStore`] that can be told to fail.
pub struct FlakyStore {
    inner: Arc<dyn SessionStore>,
    fail_reads: AtomicBool,
    fail_session_writes: AtomicBool,
    fail_attendance_writes: AtomicBool,
    attendance_write_delay_ms: AtomicU64,
    injected_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn SessionStore>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_session_writes: AtomicBool::new(false),
            fail_attendance_writes: AtomicBool::new(false),
            attendance_write_delay_ms: AtomicU64::new(0),
            injected_failures: AtomicUsize::new(0),
        }
    }

    /// Fail `get_session`, `list_sessions` and `attendance`.
    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    /// Fail session inserts, updates and deletes.
    pub fn fail_session_writes(&self, on: bool) {
        self.fail_session_writes.store(on, Ordering::SeqCst);
    }

    /// Fail participant, interval and attendance status writes.
    pub fn fail_attendance_writes(&self, on: bool) {
        self.fail_attendance_writes.store(on, Ordering::SeqCst);
    }

    /// Sleep for `delay` before each participant, interval or status write.
    pub fn delay_attendance_writes(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.attendance_write_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of operations failed on purpose so far.
    pub fn injected_failures(&self) -> usize {
        self.injected_failures.load(Ordering::SeqCst)
    }

    /// The wrapped store, bypassing failure injection.
    pub fn inner(&self) -> &Arc<dyn SessionStore> {
        &self.inner
    }

    async fn attendance_write(&self, operation: &str) -> Result<(), HubError> {
        let delay = self.attendance_write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check(&self.fail_attendance_writes, operation)
    }

    fn check(&self, switch: &AtomicBool, operation: &str) -> Result<(), HubError> {
        if switch.load(Ordering::SeqCst) {
            self.injected_failures.fetch_add(1, Ordering::SeqCst);
            Err(HubError::Store(format!("injected failure: {operation}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn insert_session(&self, session: &Session) -> Result<(), HubError> {
        self.check(&self.fail_session_writes, "insert_session")?;
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<VersionedSession>, HubError> {
        self.check(&self.fail_reads, "get_session")?;
        self.inner.get_session(session_id).await
    }

    async fn update_session(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> Result<u64, HubError> {
        self.check(&self.fail_session_writes, "update_session")?;
        self.inner.update_session(session, expected_version).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, HubError> {
        self.check(&self.fail_session_writes, "delete_session")?;
        self.inner.delete_session(session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, HubError> {
        self.check(&self.fail_reads, "list_sessions")?;
        self.inner.list_sessions().await
    }

    async fn add_participant(&self, session_id: &str, user_id: &str) -> Result<bool, HubError> {
        self.attendance_write("add_participant").await?;
        self.inner.add_participant(session_id, user_id).await
    }

    async fn open_interval(
        &self,
        session_id: &str,
        user_id: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<bool, HubError> {
        self.attendance_write("open_interval").await?;
        self.inner.open_interval(session_id, user_id, joined_at).await
    }

    async fn close_interval(
        &self,
        session_id: &str,
        user_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<Option<Interval>, HubError> {
        self.attendance_write("close_interval").await?;
        self.inner.close_interval(session_id, user_id, left_at).await
    }

    async fn set_attendance_status(
        &self,
        session_id: &str,
        user_id: &str,
        status: &str,
        display_name: Option<&str>,
    ) -> Result<(), HubError> {
        self.attendance_write("set_attendance_status").await?;
        self.inner
            .set_attendance_status(session_id, user_id, status, display_name)
            .await
    }

    async fn attendance(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, HubError> {
        self.check(&self.fail_reads, "attendance")?;
        self.inner.attendance(session_id).await
    }

    async fn ping(&self) -> Result<(), HubError> {
        self.check(&self.fail_reads, "ping")?;
        self.inner.ping().await
    }
}
