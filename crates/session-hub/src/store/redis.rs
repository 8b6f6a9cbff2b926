//! Redis-backed session store.
//!
//! # Key Patterns
//!
//! - `sessions:index` - Set of all session IDs
//! - `session:{id}` - Session document (JSON)
//! - `session:{id}:version` - Optimistic concurrency version (monotonic counter)
//! - `session:{id}:participants` - Durable participant set
//! - `session:{id}:attendees` - Users with any attendance data
//! - `session:{id}:intervals:{user}` - Interval list (JSON entries, last one may be open)
//! - `session:{id}:attendance_status` - Hash of user -> manual status (JSON)
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so each operation clones it instead of locking.

use super::{lua_scripts, SessionStore, VersionedSession};
use crate::errors::HubError;
use crate::models::{AttendanceRecord, Interval, Session};
use crate::observability::metrics::record_store_latency;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

const SESSION_INDEX_KEY: &str = "sessions:index";

fn doc_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn version_key(session_id: &str) -> String {
    format!("session:{session_id}:version")
}

fn participants_key(session_id: &str) -> String {
    format!("session:{session_id}:participants")
}

fn attendees_key(session_id: &str) -> String {
    format!("session:{session_id}:attendees")
}

fn intervals_key(session_id: &str, user_id: &str) -> String {
    format!("session:{session_id}:intervals:{user_id}")
}

fn status_key(session_id: &str) -> String {
    format!("session:{session_id}:attendance_status")
}

/// Manual attendance status as stored in the status hash.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusEntry {
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

fn redis_err(operation: &'static str, session_id: &str, e: &redis::RedisError) -> HubError {
    warn!(
        target: "hub.store.redis",
        error = %e,
        session_id = %session_id,
        operation = operation,
        "Redis operation failed"
    );
    HubError::Store(format!("{operation} failed: {e}"))
}

fn decode<T: for<'de> Deserialize<'de>>(
    what: &'static str,
    session_id: &str,
    json: &str,
) -> Result<T, HubError> {
    serde_json::from_str(json).map_err(|e| {
        error!(
            target: "hub.store.redis",
            error = %e,
            session_id = %session_id,
            what = what,
            "Failed to deserialize stored value"
        );
        HubError::Store(format!("Failed to deserialize {what}: {e}"))
    })
}

fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<String, HubError> {
    serde_json::to_string(value)
        .map_err(|e| HubError::Internal(format!("{what} serialization failed: {e}")))
}

/// Redis implementation of [`SessionStore`].
#[derive(Clone)]
pub struct RedisSessionStore {
    /// Multiplexed connection (cheaply cloneable, designed for concurrent use).
    connection: MultiplexedConnection,
    /// Precompiled Lua scripts.
    insert_script: Script,
    versioned_write_script: Script,
    add_participant_script: Script,
    open_interval_script: Script,
    close_interval_script: Script,
}

impl RedisSessionStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Store` if the URL is invalid or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, HubError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url, it may contain credentials
            error!(target: "hub.store.redis", error = %e, "Failed to open Redis client");
            HubError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "hub.store.redis", error = %e, "Failed to connect to Redis");
                HubError::Store(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            insert_script: Script::new(lua_scripts::INSERT_SESSION),
            versioned_write_script: Script::new(lua_scripts::VERSIONED_WRITE),
            add_participant_script: Script::new(lua_scripts::ADD_PARTICIPANT),
            open_interval_script: Script::new(lua_scripts::OPEN_INTERVAL),
            close_interval_script: Script::new(lua_scripts::CLOSE_INTERVAL),
        })
    }

    async fn read_session(&self, session_id: &str) -> Result<Option<VersionedSession>, HubError> {
        let mut conn = self.connection.clone();

        let (doc, version, participants): (Option<String>, Option<u64>, Vec<String>) =
            redis::pipe()
                .atomic()
                .get(doc_key(session_id))
                .get(version_key(session_id))
                .smembers(participants_key(session_id))
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_err("get_session", session_id, &e))?;

        let Some(doc) = doc else {
            return Ok(None);
        };

        let mut session: Session = decode("session", session_id, &doc)?;
        session.participants = participants.into_iter().collect();

        Ok(Some(VersionedSession {
            session,
            version: version.unwrap_or(0),
        }))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip_all, fields(session_id = %session.id))]
    async fn insert_session(&self, session: &Session) -> Result<(), HubError> {
        let start = Instant::now();
        let json = encode("session", session)?;
        let mut conn = self.connection.clone();

        let result: i64 = self
            .insert_script
            .key(doc_key(&session.id))
            .key(version_key(&session.id))
            .key(SESSION_INDEX_KEY)
            .arg(&json)
            .arg(&session.id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("insert_session", &session.id, &e))?;
        record_store_latency("insert_session", start.elapsed());

        if result == 1 {
            debug!(target: "hub.store.redis", session_id = %session.id, "Inserted session");
            Ok(())
        } else {
            Err(HubError::Conflict("Session already exists".to_string()))
        }
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn get_session(&self, session_id: &str) -> Result<Option<VersionedSession>, HubError> {
        let start = Instant::now();
        let result = self.read_session(session_id).await;
        record_store_latency("get_session", start.elapsed());
        result
    }

    #[instrument(skip_all, fields(session_id = %session.id, expected_version = expected_version))]
    async fn update_session(
        &self,
        session: &Session,
        expected_version: u64,
    ) -> Result<u64, HubError> {
        let start = Instant::now();

        // Participants live in their own set; keep the document free of them.
        let mut doc = session.clone();
        doc.participants.clear();
        let json = encode("session", &doc)?;
        let mut conn = self.connection.clone();

        let result: i64 = self
            .versioned_write_script
            .key(version_key(&session.id))
            .key(doc_key(&session.id))
            .arg(expected_version)
            .arg(&json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("update_session", &session.id, &e))?;
        record_store_latency("update_session", start.elapsed());

        match result {
            v if v > 0 => {
                debug!(
                    target: "hub.store.redis",
                    session_id = %session.id,
                    version = v,
                    "Updated session"
                );
                Ok(v.unsigned_abs())
            }
            0 => {
                warn!(
                    target: "hub.store.redis",
                    session_id = %session.id,
                    expected_version = expected_version,
                    "Version conflict when updating session"
                );
                Err(HubError::Conflict(
                    "Session was modified concurrently".to_string(),
                ))
            }
            -2 => Err(HubError::SessionNotFound(session.id.clone())),
            _ => {
                error!(
                    target: "hub.store.redis",
                    session_id = %session.id,
                    result = result,
                    "Invalid version format in Redis"
                );
                Err(HubError::Store("Invalid version format".to_string()))
            }
        }
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn delete_session(&self, session_id: &str) -> Result<bool, HubError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let attendees: Vec<String> = conn
            .smembers(attendees_key(session_id))
            .await
            .map_err(|e| redis_err("delete_session", session_id, &e))?;

        let mut keys = vec![
            doc_key(session_id),
            version_key(session_id),
            participants_key(session_id),
            attendees_key(session_id),
            status_key(session_id),
        ];
        keys.extend(attendees.iter().map(|user| intervals_key(session_id, user)));

        let (deleted, _): (u64, u64) = redis::pipe()
            .atomic()
            .del(&keys)
            .srem(SESSION_INDEX_KEY, session_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("delete_session", session_id, &e))?;
        record_store_latency("delete_session", start.elapsed());

        Ok(deleted > 0)
    }

    #[instrument(skip_all)]
    async fn list_sessions(&self) -> Result<Vec<Session>, HubError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let ids: Vec<String> = conn
            .smembers(SESSION_INDEX_KEY)
            .await
            .map_err(|e| redis_err("list_sessions", "*", &e))?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            // Index entries can outlive a half-finished delete; skip them.
            if let Some(versioned) = self.read_session(&id).await? {
                sessions.push(versioned.session);
            }
        }
        record_store_latency("list_sessions", start.elapsed());

        Ok(sessions)
    }

    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    async fn add_participant(&self, session_id: &str, user_id: &str) -> Result<bool, HubError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let result: i64 = self
            .add_participant_script
            .key(doc_key(session_id))
            .key(participants_key(session_id))
            .arg(user_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("add_participant", session_id, &e))?;
        record_store_latency("add_participant", start.elapsed());

        match result {
            -1 => Err(HubError::SessionNotFound(session_id.to_string())),
            added => Ok(added == 1),
        }
    }

    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    async fn open_interval(
        &self,
        session_id: &str,
        user_id: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<bool, HubError> {
        let start = Instant::now();
        let json = encode("interval", &Interval::open(joined_at))?;
        let mut conn = self.connection.clone();

        let result: i64 = self
            .open_interval_script
            .key(doc_key(session_id))
            .key(intervals_key(session_id, user_id))
            .key(attendees_key(session_id))
            .arg(user_id)
            .arg(&json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("open_interval", session_id, &e))?;
        record_store_latency("open_interval", start.elapsed());

        match result {
            -1 => Err(HubError::SessionNotFound(session_id.to_string())),
            opened => Ok(opened == 1),
        }
    }

    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    async fn close_interval(
        &self,
        session_id: &str,
        user_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<Option<Interval>, HubError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let closed: Option<String> = self
            .close_interval_script
            .key(intervals_key(session_id, user_id))
            .arg(left_at.to_rfc3339_opts(SecondsFormat::Millis, true))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("close_interval", session_id, &e))?;
        record_store_latency("close_interval", start.elapsed());

        closed
            .map(|json| decode("interval", session_id, &json))
            .transpose()
    }

    #[instrument(skip_all, fields(session_id = %session_id, user_id = %user_id))]
    async fn set_attendance_status(
        &self,
        session_id: &str,
        user_id: &str,
        status: &str,
        display_name: Option<&str>,
    ) -> Result<(), HubError> {
        let start = Instant::now();
        let entry = StatusEntry {
            status: status.to_string(),
            display_name: display_name.map(str::to_string),
        };
        let json = encode("attendance status", &entry)?;
        let mut conn = self.connection.clone();

        let (_, _): (u64, u64) = redis::pipe()
            .atomic()
            .hset(status_key(session_id), user_id, &json)
            .sadd(attendees_key(session_id), user_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("set_attendance_status", session_id, &e))?;
        record_store_latency("set_attendance_status", start.elapsed());

        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn attendance(&self, session_id: &str) -> Result<Vec<AttendanceRecord>, HubError> {
        let start = Instant::now();
        let mut conn = self.connection.clone();

        let mut attendees: Vec<String> = conn
            .smembers(attendees_key(session_id))
            .await
            .map_err(|e| redis_err("attendance", session_id, &e))?;
        attendees.sort();

        let mut records = Vec::with_capacity(attendees.len());
        for user_id in attendees {
            let (entries, status): (Vec<String>, Option<String>) = redis::pipe()
                .lrange(intervals_key(session_id, &user_id), 0, -1)
                .hget(status_key(session_id), &user_id)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_err("attendance", session_id, &e))?;

            let mut record = AttendanceRecord::new(user_id);
            for entry in entries {
                record.intervals.push(decode("interval", session_id, &entry)?);
            }
            if let Some(status) = status {
                let status: StatusEntry = decode("attendance status", session_id, &status)?;
                record.status = Some(status.status);
                record.display_name = status.display_name;
            }
            records.push(record);
        }
        record_store_latency("attendance", start.elapsed());

        Ok(records)
    }

    async fn ping(&self) -> Result<(), HubError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("ping", "-", &e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout_is_namespaced_by_session() {
        assert_eq!(doc_key("abc"), "session:abc");
        assert_eq!(version_key("abc"), "session:abc:version");
        assert_eq!(intervals_key("abc", "u1"), "session:abc:intervals:u1");
        for key in [
            participants_key("abc"),
            attendees_key("abc"),
            status_key("abc"),
        ] {
            assert!(key.starts_with("session:abc:"));
        }
    }

    #[test]
    fn test_status_entry_round_trips_without_display_name() {
        let entry = StatusEntry {
            status: "absent".to_string(),
            display_name: None,
        };
        let json = serde_json::to_string(&entry).unwrap_or_default();
        assert_eq!(json, r#"{"status":"absent"}"#);
    }
}
