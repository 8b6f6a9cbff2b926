//! In-process session store.
//!
//! Holds everything behind one `RwLock`, which makes each trait method a
//! single atomic step. Used with `HUB_STORE_BACKEND=memory` and in tests.

use super::{SessionStore, VersionedSession};
use crate::errors::HubError;
use crate::models::{AttendanceRecord, Interval, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug)]
struct Entry {
    session: Session,
    version: u64,
    /// Keyed by user id; ordered for stable query output.
    attendance: BTreeMap<String, AttendanceRecord>,
}

/// In-memory [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(session_id: &str) -> HubError {
    HubError::SessionNotFound(session_id.to_string())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: &Session) -> Result<(), HubError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&session.id) {
            return Err(HubError::Conflict("Session already exists".to_string()));
        }
        entries.insert(
            session.id.clone(),
            Entry {
                session: session.clone(),
                version: 1,
                attendance: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<VersionedSession>, HubError> {
        let entries = self.entries.read().await;
        Ok(entries.get(session_id).map(|entry| VersionedSession {
            session: entry.session.clone(),
            version: entry.version,
        }))
    }

    async fn update_session(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> Result<u64, HubError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&session.id)
            .ok_or_else(|| not_found(&session.id))?;

        if entry.version != expected_version {
            return Err(HubError::Conflict(
                "Session was modified concurrently".to_string(),
            ));
        }

        // The participant set is owned by add_participant.
        let participants = std::mem::take(&mut entry.session.participants);
        entry.session = session.clone();
        entry.session.participants = participants;
        entry.version += 1;
        Ok(entry.version)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, HubError> {
        Ok(self.entries.write().await.remove(session_id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, HubError> {
        let entries = self.entries.read().await;
        Ok(entries.values().map(|e| e.session.clone()).collect())
    }

    async fn add_participant(&self, session_id: &str, user_id: &str) -> Result<bool, HubError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;
        Ok(entry.session.participants.insert(user_id.to_string()))
    }

    async fn open_interval(
        &self,
        session_id: &str,
        user_id: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<bool, HubError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;
        let record = entry
            .attendance
            .entry(user_id.to_string())
            .or_insert_with(|| AttendanceRecord::new(user_id));

        if record.open_interval().is_some() {
            return Ok(false);
        }
        record.intervals.push(Interval::open(joined_at));
        Ok(true)
    }

    async fn close_interval(
        &self,
        session_id: &str,
        user_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<Option<Interval>, HubError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;

        let Some(last) = entry
            .attendance
            .get_mut(user_id)
            .and_then(|record| record.intervals.last_mut())
        else {
            return Ok(None);
        };

        if !last.is_open() {
            return Ok(None);
        }
        last.left_at = Some(left_at);
        Ok(Some(last.clone()))
    }

    async fn set_attendance_status(
        &self,
        session_id: &str,
        user_id: &str,
        status: &str,
        display_name: Option<&str>,
    ) -> Result<(), HubError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;
        let record = entry
            .attendance
            .entry(user_id.to_string())
            .or_insert_with(|| AttendanceRecord::new(user_id));

        record.status = Some(status.to_string());
        if let Some(name) = display_name {
            record.display_name = Some(name.to_string());
        }
        Ok(())
    }

    async fn attendance(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, HubError> {
        let entries = self.entries.read().await;
        let entry = entries.get(session_id).ok_or_else(|| not_found(session_id))?;
        Ok(entry.attendance.values().cloned().collect())
    }

    async fn ping(&self) -> Result<(), HubError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::CreateSessionRequest;
    use chrono::TimeZone;

    fn t(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, m, 0).unwrap()
    }

    async fn store_with_session() -> MemorySessionStore {
        let store = MemorySessionStore::new();
        let (session, _) = CreateSessionRequest {
            title: "Compilers".to_string(),
            start_time: Some(t(0)),
            ..Default::default()
        }
        .into_session("s-1".to_string(), "host".to_string(), t(0))
        .unwrap();
        store.insert_session(&session).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_duplicate_conflicts() {
        let store = store_with_session().await;
        let existing = store.get_session("s-1").await.unwrap().unwrap();
        let result = store.insert_session(&existing.session).await;
        assert!(matches!(result, Err(HubError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = store_with_session().await;
        let v1 = store.get_session("s-1").await.unwrap().unwrap();

        let mut first = v1.session.clone();
        first.title = "First".to_string();
        let v2 = store.update_session(&first, v1.version).await.unwrap();
        assert_eq!(v2, v1.version + 1);

        let mut second = v1.session.clone();
        second.title = "Second".to_string();
        let result = store.update_session(&second, v1.version).await;
        assert!(matches!(result, Err(HubError::Conflict(_))));

        let current = store.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(current.session.title, "First");
    }

    #[tokio::test]
    async fn test_update_preserves_participants() {
        let store = store_with_session().await;
        let v1 = store.get_session("s-1").await.unwrap().unwrap();
        store.add_participant("s-1", "alice").await.unwrap();

        store.update_session(&v1.session, v1.version).await.unwrap();

        let current = store.get_session("s-1").await.unwrap().unwrap();
        assert!(current.session.participants.contains("alice"));
    }

    #[tokio::test]
    async fn test_open_is_idempotent_while_open() {
        let store = store_with_session().await;
        assert!(store.open_interval("s-1", "alice", t(1)).await.unwrap());
        assert!(!store.open_interval("s-1", "alice", t(2)).await.unwrap());

        let records = store.attendance("s-1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].intervals, vec![Interval::open(t(1))]);
    }

    #[tokio::test]
    async fn test_close_without_open_returns_none() {
        let store = store_with_session().await;
        assert!(store.close_interval("s-1", "bob", t(1)).await.unwrap().is_none());

        store.open_interval("s-1", "bob", t(1)).await.unwrap();
        let closed = store.close_interval("s-1", "bob", t(5)).await.unwrap().unwrap();
        assert_eq!(closed.left_at, Some(t(5)));
        assert!(store.close_interval("s-1", "bob", t(6)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_does_not_touch_intervals() {
        let store = store_with_session().await;
        store.open_interval("s-1", "carol", t(1)).await.unwrap();
        store
            .set_attendance_status("s-1", "carol", "present", Some("Carol"))
            .await
            .unwrap();

        let records = store.attendance("s-1").await.unwrap();
        assert_eq!(records[0].status.as_deref(), Some("present"));
        assert_eq!(records[0].display_name.as_deref(), Some("Carol"));
        assert_eq!(records[0].intervals.len(), 1);
        assert!(records[0].intervals[0].is_open());
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let store = MemorySessionStore::new();
        let result = store.open_interval("nope", "alice", t(1)).await;
        assert!(matches!(result, Err(HubError::SessionNotFound(_))));
        assert!(!store.delete_session("nope").await.unwrap());
    }
}
