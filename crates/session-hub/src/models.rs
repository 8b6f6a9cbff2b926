//! Session data model.
//!
//! Wire-facing structs use camelCase field names. Request types reject unknown
//! fields; update requests are normalized into an explicit list of
//! [`SessionChange`] values before they touch a stored record.

use crate::errors::{HubError, LifecycleAction};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Maximum session title length.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Default page size for session listings.
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Maximum page size for session listings.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Message returned when a participant is admitted through the join use case.
pub const JOINED_SESSION_MESSAGE: &str = "Joined session successfully";

/// Session lifecycle status.
///
/// Serialized lowercase; parsed case-insensitively (`Ongoing` and `ongoing`
/// are the same status) by both `FromStr` and `Deserialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Scheduled for the future, room not open yet.
    Scheduled,
    /// Live; the room accepts joins.
    Ongoing,
    /// Finished normally (terminal).
    Ended,
    /// Cancelled before or during the session (terminal).
    Cancelled,
}

impl SessionStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Ongoing => "ongoing",
            SessionStatus::Ended => "ended",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Cancelled)
    }

    /// Whether `self -> target` is an allowed lifecycle edge.
    #[must_use]
    pub const fn can_transition_to(&self, target: SessionStatus) -> bool {
        matches!(
            (self, target),
            (SessionStatus::Scheduled, SessionStatus::Ongoing)
                | (SessionStatus::Ongoing, SessionStatus::Ended)
                | (SessionStatus::Scheduled, SessionStatus::Cancelled)
                | (SessionStatus::Ongoing, SessionStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "ongoing" => Ok(SessionStatus::Ongoing),
            "ended" => Ok(SessionStatus::Ended),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(HubError::Validation(format!("Unknown session status: {s}"))),
        }
    }
}

impl<'de> Deserialize<'de> for SessionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|_| {
            serde::de::Error::unknown_variant(&raw, &["scheduled", "ongoing", "ended", "cancelled"])
        })
    }
}

/// Human-readable result of a lifecycle transition, keyed by target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMessage {
    Scheduled,
    Started,
    Ended,
    Cancelled,
}

impl StatusMessage {
    /// Message for entering `status`.
    #[must_use]
    pub const fn for_status(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Scheduled => StatusMessage::Scheduled,
            SessionStatus::Ongoing => StatusMessage::Started,
            SessionStatus::Ended => StatusMessage::Ended,
            SessionStatus::Cancelled => StatusMessage::Cancelled,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StatusMessage::Scheduled => "Session scheduled successfully",
            StatusMessage::Started => "Session started successfully",
            StatusMessage::Ended => "Session ended successfully",
            StatusMessage::Cancelled => "Session cancelled successfully",
        }
    }
}

/// Durable session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub host_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attendees: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default)]
    pub has_recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    /// Present only while the session is `Ongoing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_url: Option<String>,
    /// Everyone ever admitted. Grows monotonically; not the live roster.
    #[serde(default)]
    pub participants: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deterministic join URL for a session.
#[must_use]
pub fn mint_join_url(base: &str, session_id: &str) -> String {
    format!("{}/{session_id}", base.trim_end_matches('/'))
}

impl Session {
    /// Rejects unless the room is open (status is exactly `Ongoing`).
    pub fn ensure_joinable(&self) -> Result<(), HubError> {
        if self.status == SessionStatus::Ongoing {
            Ok(())
        } else {
            Err(HubError::InvalidLifecycleTransition {
                current: self.status,
                action: LifecycleAction::Join,
            })
        }
    }

    /// Applies a lifecycle transition and its side effects.
    ///
    /// On rejection the record is left untouched.
    pub fn apply_transition(
        &mut self,
        target: SessionStatus,
        join_url_base: &str,
        now: DateTime<Utc>,
    ) -> Result<StatusMessage, HubError> {
        if !self.status.can_transition_to(target) {
            return Err(HubError::InvalidLifecycleTransition {
                current: self.status,
                action: LifecycleAction::Transition(target),
            });
        }

        self.status = target;
        match target {
            SessionStatus::Ongoing => {
                if self.join_url.as_deref().map_or(true, str::is_empty) {
                    self.join_url = Some(mint_join_url(join_url_base, &self.id));
                }
                self.is_live = true;
            }
            SessionStatus::Ended | SessionStatus::Cancelled => {
                self.join_url = None;
                self.is_live = false;
            }
            SessionStatus::Scheduled => {}
        }
        self.updated_at = now;

        Ok(StatusMessage::for_status(target))
    }

    /// Applies normalized field changes, then re-validates the schedule.
    pub fn apply_changes(
        &mut self,
        changes: Vec<SessionChange>,
        now: DateTime<Utc>,
    ) -> Result<(), HubError> {
        let mut updated = self.clone();
        for change in changes {
            match change {
                SessionChange::Title(title) => updated.title = validate_title(&title)?,
                SessionChange::Description(v) => updated.description = Some(v),
                SessionChange::Instructor(v) => updated.instructor = Some(v),
                SessionChange::Course(v) => updated.course = Some(v),
                SessionChange::DurationMinutes(v) => {
                    updated.duration_minutes = Some(validate_positive("durationMinutes", v)?);
                }
                SessionChange::MaxAttendees(v) => {
                    updated.max_attendees = Some(validate_positive("maxAttendees", v)?);
                }
                SessionChange::Tags(v) => updated.tags = v,
                SessionChange::Difficulty(v) => updated.difficulty = Some(v),
                SessionChange::StartTime(v) => updated.start_time = v,
                SessionChange::EndTime(v) => updated.end_time = Some(v),
                SessionChange::HasRecording(v) => updated.has_recording = v,
                SessionChange::RecordingUrl(v) => updated.recording_url = Some(v),
            }
        }
        validate_schedule(updated.start_time, updated.end_time)?;
        updated.updated_at = now;
        *self = updated;
        Ok(())
    }
}

/// One manually-recorded join-to-leave span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub joined_at: DateTime<Utc>,
    /// Absent while the interval is open. Never serialized as `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

impl Interval {
    #[must_use]
    pub fn open(joined_at: DateTime<Utc>) -> Self {
        Self {
            joined_at,
            left_at: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }

    /// Seconds covered by the interval; open intervals are measured up to `now`.
    #[must_use]
    pub fn duration_seconds(&self, now: DateTime<Utc>) -> i64 {
        let end = self.left_at.unwrap_or(now);
        (end - self.joined_at).num_seconds().max(0)
    }

    /// Whether the interval intersects `[from, to]` (either bound optional).
    #[must_use]
    pub fn overlaps(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
        let starts_before_end = to.map_or(true, |to| self.joined_at <= to);
        let ends_after_start =
            from.map_or(true, |from| self.left_at.map_or(true, |left| left >= from));
        starts_before_end && ends_after_start
    }
}

/// Attendance for one (session, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub user_id: String,
    #[serde(default)]
    pub intervals: Vec<Interval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl AttendanceRecord {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            intervals: Vec::new(),
            status: None,
            display_name: None,
        }
    }

    /// The currently open interval, if any. Only the last one can be open.
    #[must_use]
    pub fn open_interval(&self) -> Option<&Interval> {
        self.intervals.last().filter(|i| i.is_open())
    }

    /// Number of open intervals; 0 or 1 for any valid record.
    #[must_use]
    pub fn open_interval_count(&self) -> usize {
        self.intervals.iter().filter(|i| i.is_open()).count()
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Request body for creating a session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub title: String,
    pub description: Option<String>,
    pub instructor: Option<String>,
    pub course: Option<String>,
    pub duration_minutes: Option<u32>,
    pub max_attendees: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub difficulty: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub has_recording: bool,
    pub recording_url: Option<String>,
}

impl CreateSessionRequest {
    /// Validates the request and builds a `Scheduled` record.
    ///
    /// Returns the record and the requested initial status; an `Ongoing`
    /// request is applied afterwards through the lifecycle so its entry
    /// side effects run.
    pub fn into_session(
        self,
        id: String,
        host_id: String,
        now: DateTime<Utc>,
    ) -> Result<(Session, SessionStatus), HubError> {
        let title = validate_title(&self.title)?;
        let start_time = resolve_start_time(self.start_time, self.date.as_deref(), self.time.as_deref())?
            .ok_or_else(|| {
                HubError::Validation("startTime or date and time are required".to_string())
            })?;
        validate_schedule(start_time, self.end_time)?;

        let initial = self.status.unwrap_or(SessionStatus::Scheduled);
        if initial.is_terminal() {
            return Err(HubError::Validation(
                "A session cannot be created as ended or cancelled".to_string(),
            ));
        }

        let duration_minutes = self
            .duration_minutes
            .map(|v| validate_positive("durationMinutes", v))
            .transpose()?;
        let max_attendees = self
            .max_attendees
            .map(|v| validate_positive("maxAttendees", v))
            .transpose()?;

        let session = Session {
            id,
            title,
            host_id,
            start_time,
            end_time: self.end_time,
            status: SessionStatus::Scheduled,
            description: self.description,
            instructor: self.instructor,
            course: self.course,
            duration_minutes,
            max_attendees,
            tags: self.tags,
            difficulty: self.difficulty,
            is_live: false,
            has_recording: self.has_recording,
            recording_url: self.recording_url,
            join_url: None,
            participants: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };

        Ok((session, initial))
    }
}

/// Request body for a partial session update.
///
/// Only the fields listed here are updatable; anything else is rejected
/// during deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructor: Option<String>,
    pub course: Option<String>,
    pub duration_minutes: Option<u32>,
    pub max_attendees: Option<u32>,
    pub tags: Option<Vec<String>>,
    pub difficulty: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub has_recording: Option<bool>,
    pub recording_url: Option<String>,
}

/// A single normalized field update.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Title(String),
    Description(String),
    Instructor(String),
    Course(String),
    DurationMinutes(u32),
    MaxAttendees(u32),
    Tags(Vec<String>),
    Difficulty(String),
    StartTime(DateTime<Utc>),
    EndTime(DateTime<Utc>),
    HasRecording(bool),
    RecordingUrl(String),
}

impl UpdateSessionRequest {
    /// Normalizes the request into explicit changes.
    ///
    /// `date` + `time` collapse into a single `StartTime` change.
    pub fn into_changes(self) -> Result<Vec<SessionChange>, HubError> {
        let mut changes = Vec::new();

        if let Some(start) =
            resolve_start_time(self.start_time, self.date.as_deref(), self.time.as_deref())?
        {
            changes.push(SessionChange::StartTime(start));
        }
        if let Some(v) = self.title {
            changes.push(SessionChange::Title(v));
        }
        if let Some(v) = self.description {
            changes.push(SessionChange::Description(v));
        }
        if let Some(v) = self.instructor {
            changes.push(SessionChange::Instructor(v));
        }
        if let Some(v) = self.course {
            changes.push(SessionChange::Course(v));
        }
        if let Some(v) = self.duration_minutes {
            changes.push(SessionChange::DurationMinutes(v));
        }
        if let Some(v) = self.max_attendees {
            changes.push(SessionChange::MaxAttendees(v));
        }
        if let Some(v) = self.tags {
            changes.push(SessionChange::Tags(v));
        }
        if let Some(v) = self.difficulty {
            changes.push(SessionChange::Difficulty(v));
        }
        if let Some(v) = self.end_time {
            changes.push(SessionChange::EndTime(v));
        }
        if let Some(v) = self.has_recording {
            changes.push(SessionChange::HasRecording(v));
        }
        if let Some(v) = self.recording_url {
            changes.push(SessionChange::RecordingUrl(v));
        }

        if changes.is_empty() {
            return Err(HubError::Validation(
                "No updatable fields supplied".to_string(),
            ));
        }
        Ok(changes)
    }
}

/// Request body for a lifecycle transition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: SessionStatus,
}

/// Request body for a manual attendance status override.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttendanceStatusRequest {
    pub status: String,
    pub display_name: Option<String>,
}

// ============================================================================
// Queries and responses
// ============================================================================

/// Filters for listing sessions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub search: Option<String>,
    pub status: Option<SessionStatus>,
    pub instructor: Option<String>,
    pub course: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl SessionQuery {
    /// Whether `session` passes every supplied filter.
    #[must_use]
    pub fn matches(&self, session: &Session) -> bool {
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }
        if let Some(instructor) = &self.instructor {
            if session.instructor.as_deref() != Some(instructor.as_str()) {
                return false;
            }
        }
        if let Some(course) = &self.course {
            if session.course.as_deref() != Some(course.as_str()) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let in_title = session.title.to_lowercase().contains(&needle);
            let in_description = session
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_title && !in_description {
                return false;
            }
        }
        true
    }

    /// 1-based page number.
    #[must_use]
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
    }
}

/// A listed session with its aggregate watched count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub watched_count: usize,
}

/// One page of a session listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// Response for lifecycle transitions and joins.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActionResponse {
    pub message: String,
    pub session: Session,
}

/// Filters for attendance queries. Never mutates stored intervals.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub user_id: Option<String>,
}

/// Attendance as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceView {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub intervals: Vec<Interval>,
    pub total_seconds: i64,
}

/// Host query for the aggregate watched count.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchedQuery {
    /// Comma-separated user ids. Absent means everyone.
    pub users: Option<String>,
}

impl WatchedQuery {
    /// Requested user ids, blanks removed.
    #[must_use]
    pub fn user_ids(&self) -> Option<Vec<String>> {
        self.users.as_deref().map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedCountResponse {
    pub session_id: String,
    pub total_watched_count: usize,
}

/// Response for a recorded attendance join.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceJoinResponse {
    pub message: String,
    /// False when an interval was already open.
    pub opened: bool,
}

/// Response for a recorded attendance leave.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceLeaveResponse {
    pub message: String,
    pub interval: Interval,
}

// ============================================================================
// Validation helpers
// ============================================================================

fn validate_title(title: &str) -> Result<String, HubError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(HubError::Validation("title is required".to_string()));
    }
    if trimmed.chars().count() > MAX_TITLE_LENGTH {
        return Err(HubError::Validation(format!(
            "title must be at most {MAX_TITLE_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_positive(field: &str, value: u32) -> Result<u32, HubError> {
    if value == 0 {
        return Err(HubError::Validation(format!("{field} must be positive")));
    }
    Ok(value)
}

fn validate_schedule(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<(), HubError> {
    match end {
        Some(end) if end <= start => Err(HubError::Validation(
            "endTime must be after the start time".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Combines the accepted start-time shapes into one instant.
///
/// Either an explicit `startTime`, or `date` (`YYYY-MM-DD`) together with
/// `time` (`HH:MM` or `HH:MM:SS`, UTC). Mixing the two is rejected.
pub fn resolve_start_time(
    start_time: Option<DateTime<Utc>>,
    date: Option<&str>,
    time: Option<&str>,
) -> Result<Option<DateTime<Utc>>, HubError> {
    match (start_time, date, time) {
        (None, None, None) => Ok(None),
        (Some(start), None, None) => Ok(Some(start)),
        (None, Some(date), Some(time)) => {
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .map_err(|_| HubError::Validation(format!("Invalid date: {date}")))?;
            let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M"))
                .map_err(|_| HubError::Validation(format!("Invalid time: {time}")))?;
            Ok(Some(date.and_time(time).and_utc()))
        }
        (Some(_), _, _) => Err(HubError::Validation(
            "startTime cannot be combined with date and time".to_string(),
        )),
        (None, _, _) => Err(HubError::Validation(
            "date and time must be supplied together".to_string(),
        )),
    }
}
