//! Attendance ledger.
//!
//! Intervals are the durable record of presence. Every write is a single
//! atomic store operation, and the store enforces the one-open-interval rule
//! itself, so concurrent or repeated joins for the same user never produce a
//! second open interval.
//!
//! Timestamps are supplied by the caller. The live path captures them when
//! the event happens, which keeps recorded intervals accurate even when the
//! write lands later.

use crate::errors::HubError;
use crate::models::{AttendanceQuery, AttendanceRecord, AttendanceView, Interval, Session};
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Durable, queryable presence records.
#[derive(Clone)]
pub struct AttendanceLedger {
    store: Arc<dyn SessionStore>,
}

impl AttendanceLedger {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Open an interval for `user_id` unless one is already open.
    ///
    /// Returns `true` if a new interval was opened. Safe to call repeatedly.
    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    pub async fn record_join(
        &self,
        session_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, HubError> {
        let opened = self.store.open_interval(session_id, user_id, at).await?;
        if !opened {
            debug!(target: "hub.attendance", "Interval already open, join is a no-op");
        }
        Ok(opened)
    }

    /// Close the open interval for `user_id`.
    ///
    /// Fails with `NoOpenInterval` and leaves the ledger unchanged if none is open.
    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    pub async fn record_leave(
        &self,
        session_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Interval, HubError> {
        self.ensure_session(session_id).await?;
        self.store
            .close_interval(session_id, user_id, at)
            .await?
            .ok_or_else(|| HubError::NoOpenInterval {
                user_id: user_id.to_string(),
            })
    }

    /// Host override of a user's attendance status. Intervals are untouched.
    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    pub async fn set_status(
        &self,
        caller: &str,
        session_id: &str,
        user_id: &str,
        status: &str,
        display_name: Option<&str>,
    ) -> Result<(), HubError> {
        let status = status.trim();
        if status.is_empty() {
            return Err(HubError::Validation("status is required".to_string()));
        }
        self.ensure_host(caller, session_id).await?;
        self.store
            .set_attendance_status(session_id, user_id, status, display_name)
            .await
    }

    /// Host query over a session's attendance. Never mutates stored intervals.
    ///
    /// With a `from`/`to` range only overlapping intervals are reported, and
    /// users with none are omitted. `totalSeconds` sums the reported
    /// intervals, measuring open ones up to `now`.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn get(
        &self,
        caller: &str,
        session_id: &str,
        query: &AttendanceQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<AttendanceView>, HubError> {
        self.ensure_host(caller, session_id).await?;
        let records = self.store.attendance(session_id).await?;
        Ok(filter_records(records, query, now))
    }

    /// How many of `users` attended: present in the participants set or
    /// holding at least one interval.
    pub async fn total_watched_count(
        &self,
        session_id: &str,
        users: &[String],
    ) -> Result<usize, HubError> {
        let session = self.ensure_session(session_id).await?;
        let records = self.store.attendance(session_id).await?;
        Ok(count_watched(&session.participants, &records, Some(users)))
    }

    /// Everyone who attended the session.
    pub async fn watched_count(&self, session_id: &str) -> Result<usize, HubError> {
        let session = self.ensure_session(session_id).await?;
        let records = self.store.attendance(session_id).await?;
        Ok(count_watched(&session.participants, &records, None))
    }

    async fn ensure_session(&self, session_id: &str) -> Result<Session, HubError> {
        self.store
            .get_session(session_id)
            .await?
            .map(|v| v.session)
            .ok_or_else(|| HubError::SessionNotFound(session_id.to_string()))
    }

    async fn ensure_host(&self, caller: &str, session_id: &str) -> Result<(), HubError> {
        let session = self.ensure_session(session_id).await?;
        if session.host_id == caller {
            Ok(())
        } else {
            Err(HubError::PermissionDenied(
                "Only the session host can manage attendance".to_string(),
            ))
        }
    }
}

/// Users counted as having attended.
///
/// `users` restricts the count to the given ids; `None` counts everyone.
#[must_use]
pub fn count_watched(
    participants: &BTreeSet<String>,
    records: &[AttendanceRecord],
    users: Option<&[String]>,
) -> usize {
    let attended: BTreeSet<&str> = participants
        .iter()
        .map(String::as_str)
        .chain(
            records
                .iter()
                .filter(|r| !r.intervals.is_empty())
                .map(|r| r.user_id.as_str()),
        )
        .collect();

    match users {
        Some(users) => users
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|u| attended.contains(u))
            .count(),
        None => attended.len(),
    }
}

fn filter_records(
    records: Vec<AttendanceRecord>,
    query: &AttendanceQuery,
    now: DateTime<Utc>,
) -> Vec<AttendanceView> {
    let ranged = query.from.is_some() || query.to.is_some();
    let status = query.status.as_deref().map(str::trim).filter(|s| !s.is_empty());

    records
        .into_iter()
        .filter(|r| query.user_id.as_deref().map_or(true, |u| r.user_id == u))
        .filter(|r| {
            status.map_or(true, |wanted| {
                r.status
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(wanted))
            })
        })
        .filter_map(|record| {
            let intervals: Vec<Interval> = if ranged {
                record
                    .intervals
                    .into_iter()
                    .filter(|i| i.overlaps(query.from, query.to))
                    .collect()
            } else {
                record.intervals
            };
            if ranged && intervals.is_empty() {
                return None;
            }
            let total_seconds = intervals.iter().map(|i| i.duration_seconds(now)).sum();
            Some(AttendanceView {
                user_id: record.user_id,
                display_name: record.display_name,
                status: record.status,
                intervals,
                total_seconds,
            })
        })
        .collect()
}
