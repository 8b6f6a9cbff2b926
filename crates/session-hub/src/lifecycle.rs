//! Session management use cases.
//!
//! `SessionLifecycle` is the only writer of session documents. Every
//! status-changing write is an optimistic compare-and-set against the
//! version read at the start of the attempt; on a version conflict the whole
//! read-check-write is retried a bounded number of times so a lost race
//! never applies a transition that was only valid against stale state.
//!
//! # State machine
//!
//! ```text
//! Scheduled ──► Ongoing ──► Ended
//!     │            │
//!     └────────────┴──────► Cancelled
//! ```
//!
//! `Ended` and `Cancelled` are terminal. Joins are allowed only while the
//! session is exactly `Ongoing`.

use crate::attendance::count_watched;
use crate::errors::HubError;
use crate::models::{
    CreateSessionRequest, Session, SessionActionResponse, SessionPage, SessionQuery,
    SessionStatus, SessionSummary, UpdateSessionRequest, JOINED_SESSION_MESSAGE,
};
use crate::observability::metrics::record_lifecycle_transition;
use crate::store::{SessionStore, VersionedSession};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Attempts for a read-modify-write before a version conflict is surfaced.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Session lifecycle service.
#[derive(Clone)]
pub struct SessionLifecycle {
    store: Arc<dyn SessionStore>,
    join_url_base: String,
}

impl SessionLifecycle {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, join_url_base: impl Into<String>) -> Self {
        Self {
            store,
            join_url_base: join_url_base.into(),
        }
    }

    /// Create a session hosted by `host_id`.
    ///
    /// A request with `status: ongoing` goes through the `Scheduled -> Ongoing`
    /// transition before the first write, so the join URL is minted.
    #[instrument(skip_all, fields(host_id = %host_id))]
    pub async fn create(
        &self,
        host_id: &str,
        request: CreateSessionRequest,
    ) -> Result<Session, HubError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let (mut session, initial) = request.into_session(id, host_id.to_string(), now)?;

        if initial == SessionStatus::Ongoing {
            session.apply_transition(SessionStatus::Ongoing, &self.join_url_base, now)?;
        }

        self.store.insert_session(&session).await?;
        if initial == SessionStatus::Ongoing {
            record_lifecycle_transition(SessionStatus::Ongoing.as_str());
        }

        info!(
            target: "hub.lifecycle",
            session_id = %session.id,
            status = %session.status,
            "Session created"
        );

        Ok(session)
    }

    /// Fetch one session.
    pub async fn get(&self, session_id: &str) -> Result<Session, HubError> {
        Ok(self.load(session_id).await?.session)
    }

    /// List sessions matching `query`, ordered by start time.
    #[instrument(skip_all)]
    pub async fn list(&self, query: &SessionQuery) -> Result<SessionPage, HubError> {
        let mut matching: Vec<Session> = self
            .store
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| query.matches(s))
            .collect();
        matching.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = matching.len();
        let page = query.page();
        let limit = query.limit();
        let offset = (page - 1).saturating_mul(limit);

        let mut sessions = Vec::with_capacity(limit.min(total));
        for session in matching.into_iter().skip(offset).take(limit) {
            let records = self.store.attendance(&session.id).await?;
            let watched_count = count_watched(&session.participants, &records, None);
            sessions.push(SessionSummary {
                session,
                watched_count,
            });
        }

        Ok(SessionPage {
            sessions,
            total,
            page,
            limit,
        })
    }

    /// Apply a partial update. Host only; status is not updatable here.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn update(
        &self,
        caller: &str,
        session_id: &str,
        request: UpdateSessionRequest,
    ) -> Result<Session, HubError> {
        let changes = request.into_changes()?;

        let (session, ()) = self
            .modify(session_id, |session| {
                ensure_host(session, caller, "update")?;
                session.apply_changes(changes.clone(), Utc::now())
            })
            .await?;

        info!(target: "hub.lifecycle", session_id = %session_id, "Session updated");
        Ok(session)
    }

    /// Delete a session and its attendance. Host only.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn delete(&self, caller: &str, session_id: &str) -> Result<(), HubError> {
        let current = self.load(session_id).await?;
        ensure_host(&current.session, caller, "delete")?;

        if !self.store.delete_session(session_id).await? {
            return Err(HubError::SessionNotFound(session_id.to_string()));
        }

        info!(target: "hub.lifecycle", session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Move the session to `target`. Host only.
    #[instrument(skip_all, fields(session_id = %session_id, target = %target))]
    pub async fn transition(
        &self,
        caller: &str,
        session_id: &str,
        target: SessionStatus,
    ) -> Result<SessionActionResponse, HubError> {
        let (session, message) = self
            .modify(session_id, |session| {
                ensure_host(session, caller, "change the status of")?;
                session.apply_transition(target, &self.join_url_base, Utc::now())
            })
            .await?;

        record_lifecycle_transition(target.as_str());
        info!(
            target: "hub.lifecycle",
            session_id = %session_id,
            status = %target,
            "Session status changed"
        );

        Ok(SessionActionResponse {
            message: message.as_str().to_string(),
            session,
        })
    }

    /// Admit `user_id` to the session. Only allowed while `Ongoing`.
    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    pub async fn join(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionActionResponse, HubError> {
        let mut session = self.ensure_joinable(session_id).await?;

        if self.store.add_participant(session_id, user_id).await? {
            debug!(target: "hub.lifecycle", session_id = %session_id, "Participant added");
        }
        session.participants.insert(user_id.to_string());

        Ok(SessionActionResponse {
            message: JOINED_SESSION_MESSAGE.to_string(),
            session,
        })
    }

    /// The join gate shared by the HTTP join and the live `join-room` event.
    pub async fn ensure_joinable(&self, session_id: &str) -> Result<Session, HubError> {
        let session = self.load(session_id).await?.session;
        session.ensure_joinable()?;
        Ok(session)
    }

    async fn load(&self, session_id: &str) -> Result<VersionedSession, HubError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| HubError::SessionNotFound(session_id.to_string()))
    }

    /// Read, apply `mutate`, and write back against the read version.
    ///
    /// `mutate` must be side-effect free; it runs again on every retry.
    async fn modify<T, F>(&self, session_id: &str, mut mutate: F) -> Result<(Session, T), HubError>
    where
        F: FnMut(&mut Session) -> Result<T, HubError>,
    {
        let mut attempt = 1;
        loop {
            let VersionedSession {
                mut session,
                version,
            } = self.load(session_id).await?;
            let outcome = mutate(&mut session)?;

            match self.store.update_session(&session, version).await {
                Ok(_) => return Ok((session, outcome)),
                Err(HubError::Conflict(_)) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(
                        target: "hub.lifecycle",
                        session_id = %session_id,
                        attempt = attempt,
                        "Concurrent session write, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn ensure_host(session: &Session, caller: &str, action: &str) -> Result<(), HubError> {
    if session.host_id == caller {
        Ok(())
    } else {
        Err(HubError::PermissionDenied(format!(
            "Only the session host can {action} this session"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use chrono::{Duration, Utc};

    const BASE: &str = "/faculty/video-conference";

    fn lifecycle() -> SessionLifecycle {
        SessionLifecycle::new(Arc::new(MemorySessionStore::new()), BASE)
    }

    fn request(title: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            title: title.to_string(),
            start_time: Some(Utc::now() + Duration::hours(1)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_defaults_to_scheduled() {
        let lc = lifecycle();
        let session = lc.create("host", request("Algorithms")).await.unwrap();

        assert_eq!(session.status, SessionStatus::Scheduled);
        assert!(session.join_url.is_none());
        assert!(!session.is_live);
        assert_eq!(lc.get(&session.id).await.unwrap(), session);
    }

    #[tokio::test]
    async fn test_create_as_ongoing_mints_join_url() {
        let lc = lifecycle();
        let mut req = request("Live now");
        req.status = Some(SessionStatus::Ongoing);

        let session = lc.create("host", req).await.unwrap();
        assert_eq!(session.status, SessionStatus::Ongoing);
        assert_eq!(
            session.join_url.as_deref(),
            Some(format!("{BASE}/{}", session.id).as_str())
        );
    }

    #[tokio::test]
    async fn test_lifecycle_walkthrough() {
        let lc = lifecycle();
        let s = lc.create("host", request("Networks")).await.unwrap();

        let err = lc.join("user-a", &s.id).await.unwrap_err();
        assert!(matches!(
            err,
            HubError::InvalidLifecycleTransition {
                current: SessionStatus::Scheduled,
                ..
            }
        ));

        let started = lc
            .transition("host", &s.id, SessionStatus::Ongoing)
            .await
            .unwrap();
        assert_eq!(started.message, "Session started successfully");
        assert!(started.session.join_url.as_deref().is_some_and(|u| !u.is_empty()));

        let joined = lc.join("user-a", &s.id).await.unwrap();
        assert_eq!(joined.message, JOINED_SESSION_MESSAGE);
        assert!(joined.session.participants.contains("user-a"));

        let ended = lc
            .transition("host", &s.id, SessionStatus::Ended)
            .await
            .unwrap();
        assert_eq!(ended.message, "Session ended successfully");
        assert!(ended.session.join_url.is_none());
        // Participants survive unrelated document writes.
        assert!(ended.session.participants.contains("user-a"));

        assert!(lc.join("user-c", &s.id).await.is_err());
        let err = lc
            .transition("host", &s.id, SessionStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidLifecycleTransition { .. }));
    }

    #[tokio::test]
    async fn test_only_host_can_mutate() {
        let lc = lifecycle();
        let s = lc.create("host", request("Private")).await.unwrap();

        let err = lc
            .transition("intruder", &s.id, SessionStatus::Ongoing)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::PermissionDenied(_)));

        let update = UpdateSessionRequest {
            title: Some("Hijacked".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            lc.update("intruder", &s.id, update).await,
            Err(HubError::PermissionDenied(_))
        ));
        assert!(matches!(
            lc.delete("intruder", &s.id).await,
            Err(HubError::PermissionDenied(_))
        ));
        assert_eq!(lc.get(&s.id).await.unwrap().status, SessionStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let lc = lifecycle();
        let s = lc.create("host", request("Draft")).await.unwrap();

        let update = UpdateSessionRequest {
            title: Some("  Final title ".to_string()),
            tags: Some(vec!["rust".to_string()]),
            ..Default::default()
        };
        let updated = lc.update("host", &s.id, update).await.unwrap();
        assert_eq!(updated.title, "Final title");
        assert_eq!(updated.tags, vec!["rust".to_string()]);

        lc.delete("host", &s.id).await.unwrap();
        assert!(matches!(
            lc.get(&s.id).await,
            Err(HubError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let lc = lifecycle();
        assert!(matches!(
            lc.ensure_joinable("nope").await,
            Err(HubError::SessionNotFound(_))
        ));
        assert!(matches!(
            lc.transition("host", "nope", SessionStatus::Ongoing).await,
            Err(HubError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let lc = lifecycle();
        for i in 0..5 {
            let mut req = request(&format!("Lecture {i}"));
            req.start_time = Some(Utc::now() + Duration::hours(i64::from(i) + 1));
            req.course = Some(if i % 2 == 0 { "cs101" } else { "cs202" }.to_string());
            lc.create("host", req).await.unwrap();
        }

        let page = lc
            .list(&SessionQuery {
                course: Some("cs101".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.sessions.len(), 2);
        assert_eq!(page.sessions[0].session.title, "Lecture 0");
        assert_eq!(page.sessions[1].session.title, "Lecture 2");

        let page = lc
            .list(&SessionQuery {
                course: Some("cs101".to_string()),
                limit: Some(2),
                page: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].session.title, "Lecture 4");
    }

    #[tokio::test]
    async fn test_list_reports_watched_count() {
        let lc = lifecycle();
        let mut req = request("Watched");
        req.status = Some(SessionStatus::Ongoing);
        let s = lc.create("host", req).await.unwrap();
        lc.join("a", &s.id).await.unwrap();
        lc.join("b", &s.id).await.unwrap();

        let page = lc.list(&SessionQuery::default()).await.unwrap();
        assert_eq!(page.sessions[0].watched_count, 2);
    }
}
