//! Live path integration tests.
//!
//! Drives `ConnectionActor`s directly (no sockets) against a real registry,
//! lifecycle and in-memory store, reading each connection's outbound queue.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration as ChronoDuration, Utc};
use hub_test_utils::{assert_no_event, drain, next_named, test_config, FlakyStore, TestSession};
use serde_json::{json, Value};
use session_hub::actors::{ActorMetrics, ConnectionActor, ConnectionActorHandle};
use session_hub::errors::HubError;
use session_hub::models::{AttendanceRecord, CreateSessionRequest, SessionStatus};
use session_hub::routes::AppState;
use session_hub::signaling::protocol::ServerEvent;
use session_hub::store::{MemorySessionStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helpers
// ============================================================================

fn hub(store: Arc<dyn SessionStore>) -> AppState {
    AppState::new(test_config(&[]), store, ActorMetrics::new())
}

/// One client connection without a socket.
struct TestClient {
    user_id: String,
    handle: ConnectionActorHandle,
    rx: mpsc::Receiver<ServerEvent>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestClient {
    fn connect(state: &AppState, user_id: &str) -> Self {
        let token = state.registry.child_token();
        let (handle, rx, task) = ConnectionActor::spawn(
            uuid::Uuid::new_v4().to_string(),
            user_id.to_string(),
            state.connections.clone(),
            token.clone(),
        );
        Self {
            user_id: user_id.to_string(),
            handle,
            rx,
            token,
            task,
        }
    }

    async fn send(&self, event: &str, data: Value) {
        self.handle
            .frame(json!({ "event": event, "data": data }).to_string())
            .await
            .unwrap();
    }

    async fn join(&self, session_id: &str) {
        self.send(
            "join-room",
            json!({
                "sessionId": session_id,
                "userId": self.user_id,
                "username": self.user_id.to_uppercase(),
            }),
        )
        .await;
    }

    /// Join and wait for the roster snapshot.
    async fn join_and_wait(&mut self, session_id: &str) -> Vec<String> {
        self.join(session_id).await;
        match next_named(&mut self.rx, "participant-list").await {
            ServerEvent::ParticipantList(list) => list.into_iter().map(|p| p.user_id).collect(),
            other => unreachable!("expected participant-list, got {other:?}"),
        }
    }

    async fn next_error(&mut self) -> (String, Option<String>) {
        match next_named(&mut self.rx, "error").await {
            ServerEvent::Error(e) => (e.code, e.to),
            other => unreachable!("expected error, got {other:?}"),
        }
    }

    /// Drop the connection the way a closed socket does, and wait for teardown.
    async fn disconnect(self) {
        self.token.cancel();
        self.task.await.unwrap();
    }
}

async fn roster(state: &AppState, session_id: &str) -> Vec<String> {
    state
        .registry
        .roster(session_id.to_string())
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.user_id)
        .collect()
}

async fn attendance(
    state: &AppState,
    store: &dyn SessionStore,
    session_id: &str,
) -> Vec<AttendanceRecord> {
    state
        .registry
        .sync_attendance(session_id.to_string())
        .await
        .unwrap();
    store.attendance(session_id).await.unwrap()
}

fn open_intervals(records: &[AttendanceRecord], user_id: &str) -> usize {
    records
        .iter()
        .find(|r| r.user_id == user_id)
        .map_or(0, AttendanceRecord::open_interval_count)
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[tokio::test]
async fn test_session_scenario_from_schedule_to_end() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));

    // Created as Scheduled
    let session = state
        .lifecycle
        .create(
            "host-1",
            CreateSessionRequest {
                title: "Operating Systems".to_string(),
                start_time: Some(Utc::now() + ChronoDuration::hours(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let s = session.id.clone();
    assert_eq!(session.status, SessionStatus::Scheduled);

    // Join before the room opens is rejected, both over HTTP and live
    let err = state.lifecycle.join("user-a", &s).await.unwrap_err();
    assert!(matches!(err, HubError::InvalidLifecycleTransition { .. }));

    let mut a = TestClient::connect(&state, "user-a");
    a.join(&s).await;
    assert_eq!(a.next_error().await.0, "INVALID_LIFECYCLE_TRANSITION");
    assert!(roster(&state, &s).await.is_empty());

    // Start: join URL minted
    let started = state
        .lifecycle
        .transition("host-1", &s, SessionStatus::Ongoing)
        .await
        .unwrap();
    assert_eq!(started.message, "Session started successfully");
    assert!(started
        .session
        .join_url
        .as_deref()
        .is_some_and(|u| !u.is_empty()));

    state.lifecycle.join("user-a", &s).await.unwrap();

    // A and B join concurrently
    let mut b = TestClient::connect(&state, "user-b");
    let (list_a, list_b) = tokio::join!(a.join_and_wait(&s), b.join_and_wait(&s));
    assert!(list_a.contains(&"user-a".to_string()));
    assert!(list_b.contains(&"user-b".to_string()));

    let mut live = roster(&state, &s).await;
    live.sort();
    assert_eq!(live, vec!["user-a", "user-b"]);

    let records = attendance(&state, store.as_ref(), &s).await;
    assert_eq!(open_intervals(&records, "user-a"), 1);
    assert_eq!(open_intervals(&records, "user-b"), 1);

    // B offers to A; A receives it verbatim
    let payload = json!({ "type": "offer", "sdp": "v=0\r\no=- 42 2 IN IP4 127.0.0.1\r\n" });
    b.send(
        "video-offer",
        json!({ "from": "user-b", "to": "user-a", "sessionId": s, "payload": payload }),
    )
    .await;
    match next_named(&mut a.rx, "video-offer").await {
        ServerEvent::VideoOffer(envelope) => {
            assert_eq!(envelope.from, "user-b");
            assert_eq!(envelope.to.as_deref(), Some("user-a"));
            assert_eq!(envelope.payload, payload);
        }
        other => unreachable!("expected video-offer, got {other:?}"),
    }

    // A disconnects without an explicit leave
    let before_leave = Utc::now();
    a.disconnect().await;

    match next_named(&mut b.rx, "user-left").await {
        ServerEvent::UserLeft(left) => assert_eq!(left.user_id, "user-a"),
        other => unreachable!("expected user-left, got {other:?}"),
    }
    assert_eq!(roster(&state, &s).await, vec!["user-b"]);

    let records = attendance(&state, store.as_ref(), &s).await;
    let a_record = records.iter().find(|r| r.user_id == "user-a").unwrap();
    assert_eq!(a_record.intervals.len(), 1);
    let interval = a_record.intervals.first().unwrap();
    assert!(interval.left_at.is_some_and(|left| left >= before_leave));
    assert_eq!(open_intervals(&records, "user-b"), 1);

    // End: join URL cleared, further joins rejected
    let ended = state
        .lifecycle
        .transition("host-1", &s, SessionStatus::Ended)
        .await
        .unwrap();
    assert!(ended.session.join_url.is_none());

    let err = state.lifecycle.join("user-c", &s).await.unwrap_err();
    assert!(matches!(err, HubError::InvalidLifecycleTransition { .. }));

    let mut c = TestClient::connect(&state, "user-c");
    c.join(&s).await;
    assert_eq!(c.next_error().await.0, "INVALID_LIFECYCLE_TRANSITION");

    // B stays connected after the end
    assert_eq!(roster(&state, &s).await, vec!["user-b"]);

    let err = state
        .lifecycle
        .transition("host-1", &s, SessionStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::InvalidLifecycleTransition { .. }));
}

// ============================================================================
// Presence
// ============================================================================

#[tokio::test]
async fn test_reconnect_supersedes_previous_connection() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Algorithms").ongoing().insert(store.as_ref()).await;

    let mut first = TestClient::connect(&state, "user-a");
    first.join_and_wait(&session.id).await;

    let mut observer = TestClient::connect(&state, "user-b");
    observer.join_and_wait(&session.id).await;

    let mut second = TestClient::connect(&state, "user-a");
    let list = second.join_and_wait(&session.id).await;
    assert_eq!(list.iter().filter(|u| *u == "user-a").count(), 1);

    // Old connection is told and closed
    match next_named(&mut first.rx, "session-superseded").await {
        ServerEvent::SessionSuperseded(s) => assert_eq!(s.session_id, session.id),
        other => unreachable!("expected session-superseded, got {other:?}"),
    }
    first.task.await.unwrap();
    assert!(first.token.is_cancelled());

    // The superseded connection's teardown does not remove its successor
    let mut live = roster(&state, &session.id).await;
    live.sort();
    assert_eq!(live, vec!["user-a", "user-b"]);

    let remaining: Vec<&'static str> = drain(&mut observer.rx).iter().map(ServerEvent::name).collect();
    assert!(!remaining.contains(&"user-left"));

    let records = attendance(&state, store.as_ref(), &session.id).await;
    let a = records.iter().find(|r| r.user_id == "user-a").unwrap();
    assert_eq!(a.intervals.len(), 1);
    assert_eq!(a.open_interval_count(), 1);
}

#[tokio::test]
async fn test_join_unknown_session_changes_nothing() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));

    let mut a = TestClient::connect(&state, "user-a");
    a.join("no-such-session").await;
    assert_eq!(a.next_error().await.0, "SESSION_NOT_FOUND");
    assert!(roster(&state, "no-such-session").await.is_empty());
}

#[tokio::test]
async fn test_join_frame_without_data_is_malformed_join() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Parsing").ongoing().insert(store.as_ref()).await;

    let mut a = TestClient::connect(&state, "user-a");
    for frame in [r#"{"event":"join-room"}"#, r#"{"event":"join-room","data":null}"#] {
        a.handle.frame(frame.to_string()).await.unwrap();
        match next_named(&mut a.rx, "error").await {
            ServerEvent::Error(e) => {
                assert_eq!(e.code, "MALFORMED_JOIN");
                assert_eq!(e.event.as_deref(), Some("join-room"));
            }
            other => unreachable!("expected error, got {other:?}"),
        }
    }
    assert!(roster(&state, &session.id).await.is_empty());
}

#[tokio::test]
async fn test_join_as_another_user_is_rejected() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Security").ongoing().insert(store.as_ref()).await;

    let mut a = TestClient::connect(&state, "user-a");
    a.send(
        "join-room",
        json!({ "sessionId": session.id, "userId": "user-z", "username": "Z" }),
    )
    .await;
    assert_eq!(a.next_error().await.0, "FORBIDDEN");
    assert!(roster(&state, &session.id).await.is_empty());
}

#[tokio::test]
async fn test_concurrent_joins_are_all_reflected() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Compilers").ongoing().insert(store.as_ref()).await;

    let mut clients: Vec<TestClient> = (0..20)
        .map(|i| TestClient::connect(&state, &format!("user-{i}")))
        .collect();

    futures_util::future::join_all(clients.iter().map(|c| c.join(&session.id))).await;
    for client in &mut clients {
        next_named(&mut client.rx, "participant-list").await;
    }

    let live = roster(&state, &session.id).await;
    assert_eq!(live.len(), 20);

    let records = attendance(&state, store.as_ref(), &session.id).await;
    assert_eq!(records.len(), 20);
    assert!(records.iter().all(|r| r.open_interval_count() == 1));

    let stored = store.get_session(&session.id).await.unwrap().unwrap().session;
    assert_eq!(stored.participants.len(), 20);
}

// ============================================================================
// Signaling and broadcast
// ============================================================================

#[tokio::test]
async fn test_signal_to_absent_user_is_reported_to_sender() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Networks").ongoing().insert(store.as_ref()).await;

    let mut a = TestClient::connect(&state, "user-a");
    a.join_and_wait(&session.id).await;

    a.send(
        "ice-candidate",
        json!({ "from": "user-a", "to": "ghost", "sessionId": session.id, "payload": {} }),
    )
    .await;

    let (code, to) = a.next_error().await;
    assert_eq!(code, "RECIPIENT_UNREACHABLE");
    assert_eq!(to.as_deref(), Some("ghost"));
}

#[tokio::test]
async fn test_broadcast_audiences() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Graphics").ongoing().insert(store.as_ref()).await;

    let mut a = TestClient::connect(&state, "user-a");
    a.join_and_wait(&session.id).await;
    let mut b = TestClient::connect(&state, "user-b");
    b.join_and_wait(&session.id).await;
    next_named(&mut a.rx, "user-joined").await;

    // Reactions include the sender
    a.send(
        "send-reaction",
        json!({ "sessionId": session.id, "userId": "user-a", "userName": "A", "emoji": "👏" }),
    )
    .await;
    for client in [&mut a, &mut b] {
        match next_named(&mut client.rx, "new-reaction").await {
            ServerEvent::NewReaction(r) => {
                assert_eq!(r.emoji, "👏");
                assert!(!r.id.is_empty());
            }
            other => unreachable!("expected new-reaction, got {other:?}"),
        }
    }

    // Media state goes to others only, and updates the roster
    a.send(
        "media-state-changed",
        json!({ "sessionId": session.id, "userId": "user-a", "micOn": true, "cameraOn": false }),
    )
    .await;
    match next_named(&mut b.rx, "media-state-changed").await {
        ServerEvent::MediaStateChanged(m) => assert!(m.mic_on),
        other => unreachable!("expected media-state-changed, got {other:?}"),
    }
    assert_no_event(&mut a.rx, Duration::from_millis(100)).await;

    let views = state.registry.roster(session.id.clone()).await.unwrap();
    let a_view = views.iter().find(|p| p.user_id == "user-a").unwrap();
    assert!(a_view.mic_on);
    assert!(!a_view.camera_on);
}

// ============================================================================
// Persistence tolerance
// ============================================================================

#[tokio::test]
async fn test_attendance_outage_does_not_block_live_presence() {
    let memory: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let flaky = Arc::new(FlakyStore::new(Arc::clone(&memory)));
    let store: Arc<dyn SessionStore> = flaky.clone();
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Databases").ongoing().insert(store.as_ref()).await;

    flaky.fail_attendance_writes(true);

    let mut a = TestClient::connect(&state, "user-a");
    let list = a.join_and_wait(&session.id).await;
    assert_eq!(list, vec!["user-a"]);
    assert_eq!(roster(&state, &session.id).await, vec!["user-a"]);

    let records = attendance(&state, memory.as_ref(), &session.id).await;
    assert_eq!(open_intervals(&records, "user-a"), 0);
    assert!(flaky.injected_failures() >= 1);

    // Once storage recovers, a leave finds no interval to close; still not fatal
    flaky.fail_attendance_writes(false);
    a.disconnect().await;
    assert!(roster(&state, &session.id).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_attendance_flush_does_not_hold_up_the_room() {
    let memory: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let flaky = Arc::new(FlakyStore::new(Arc::clone(&memory)));
    let store: Arc<dyn SessionStore> = flaky.clone();
    let state = hub(Arc::clone(&store));
    let session = TestSession::new("Networks").ongoing().insert(store.as_ref()).await;

    flaky.delay_attendance_writes(Duration::from_secs(2));

    let mut a = TestClient::connect(&state, "user-a");
    a.join_and_wait(&session.id).await;

    let sync = {
        let registry = state.registry.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move { registry.sync_attendance(session_id).await })
    };
    // Let the flush request reach the room
    tokio::time::sleep(Duration::from_millis(10)).await;

    let live = tokio::time::timeout(Duration::from_millis(100), roster(&state, &session.id))
        .await
        .expect("roster answered while attendance writes were pending");
    assert_eq!(live, vec!["user-a"]);
    assert!(!sync.is_finished());

    sync.await.unwrap().unwrap();
    let records = memory.attendance(&session.id).await.unwrap();
    assert_eq!(open_intervals(&records, "user-a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_after_idle_collection_keeps_interval_open() {
    let memory: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let flaky = Arc::new(FlakyStore::new(Arc::clone(&memory)));
    let store: Arc<dyn SessionStore> = flaky.clone();
    let state = AppState::new(
        test_config(&[("HUB_ROOM_IDLE_TIMEOUT_SECONDS", "1")]),
        Arc::clone(&store),
        ActorMetrics::new(),
    );
    let session = TestSession::new("Networks").ongoing().insert(store.as_ref()).await;

    flaky.delay_attendance_writes(Duration::from_secs(1));

    let mut a = TestClient::connect(&state, "user-a");
    a.join_and_wait(&session.id).await;
    a.disconnect().await;

    // The empty room is collected while its join and leave are still queued
    for _ in 0..50 {
        if state.registry.status().await.unwrap().room_count == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(state.registry.status().await.unwrap().room_count, 0);

    let mut again = TestClient::connect(&state, "user-a");
    assert_eq!(again.join_and_wait(&session.id).await, vec!["user-a"]);

    let records = attendance(&state, memory.as_ref(), &session.id).await;
    let record = records.iter().find(|r| r.user_id == "user-a").unwrap();
    assert_eq!(record.intervals.len(), 2);
    assert_eq!(record.open_interval_count(), 1);
    assert!(record.intervals.last().unwrap().is_open());
}
