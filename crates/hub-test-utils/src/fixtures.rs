//! Test fixtures.
//!
//! Configuration that never touches the process environment, and a builder
//! for stored sessions.

use chrono::{DateTime, Duration, Utc};
use session_hub::config::Config;
use session_hub::models::{CreateSessionRequest, Session, SessionStatus};
use session_hub::store::SessionStore;
use std::collections::HashMap;

/// Join URL prefix used by test configurations.
pub const TEST_JOIN_URL_BASE: &str = "/faculty/video-conference";

/// Environment for a memory-backed hub bound to loopback.
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        ("HUB_STORE_BACKEND".to_string(), "memory".to_string()),
        ("HUB_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("HUB_HEALTH_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("HUB_ID".to_string(), "hub-test".to_string()),
        (
            "HUB_JOIN_URL_BASE".to_string(),
            TEST_JOIN_URL_BASE.to_string(),
        ),
    ])
}

/// Test configuration, with `overrides` applied on top of [`test_config_vars`].
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars = test_config_vars();
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).expect("test configuration should be valid")
}

/// Builder for a session written straight to a store.
///
/// Sessions built with [`TestSession::ongoing`] already carry a join URL, as
/// if the host had started them.
#[derive(Debug, Clone)]
pub struct TestSession {
    id: String,
    title: String,
    host_id: String,
    start_time: DateTime<Utc>,
    instructor: Option<String>,
    course: Option<String>,
    status: SessionStatus,
}

impl TestSession {
    pub fn new(title: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            host_id: "host-1".to_string(),
            start_time: Utc::now() + Duration::hours(1),
            instructor: None,
            course: None,
            status: SessionStatus::Scheduled,
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn host(mut self, host_id: &str) -> Self {
        self.host_id = host_id.to_string();
        self
    }

    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn instructor(mut self, instructor: &str) -> Self {
        self.instructor = Some(instructor.to_string());
        self
    }

    pub fn course(mut self, course: &str) -> Self {
        self.course = Some(course.to_string());
        self
    }

    pub fn ongoing(self) -> Self {
        self.status(SessionStatus::Ongoing)
    }

    /// Final status, reached through the lifecycle edges from `Scheduled`.
    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Build the record without storing it.
    pub fn build(self) -> Session {
        let now = Utc::now();
        let (mut session, _) = CreateSessionRequest {
            title: self.title,
            start_time: Some(self.start_time),
            instructor: self.instructor,
            course: self.course,
            ..Default::default()
        }
        .into_session(self.id, self.host_id, now)
        .expect("test session should be valid");

        let path: &[SessionStatus] = match self.status {
            SessionStatus::Scheduled => &[],
            SessionStatus::Ongoing => &[SessionStatus::Ongoing],
            SessionStatus::Ended => &[SessionStatus::Ongoing, SessionStatus::Ended],
            SessionStatus::Cancelled => &[SessionStatus::Cancelled],
        };
        for step in path {
            session
                .apply_transition(*step, TEST_JOIN_URL_BASE, now)
                .expect("lifecycle path should be valid");
        }
        session
    }

    /// Build the record and insert it into `store`.
    pub async fn insert(self, store: &dyn SessionStore) -> Session {
        let session = self.build();
        store
            .insert_session(&session)
            .await
            .expect("test session insert should succeed");
        session
    }
}
