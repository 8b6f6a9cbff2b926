//! Readers for outbound connection queues.
//!
//! Integration tests that drive `ConnectionActor`s directly read what each
//! connection would have written to its socket through these helpers.

use session_hub::signaling::protocol::ServerEvent;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a reader waits for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Next event on `rx`. Panics after [`EVENT_TIMEOUT`] or if the queue closed.
pub async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for an outbound event")
        .expect("outbound queue closed")
}

/// Next event named `name`, skipping any others.
pub async fn next_named(rx: &mut mpsc::Receiver<ServerEvent>, name: &str) -> ServerEvent {
    loop {
        let event = next_event(rx).await;
        if event.name() == name {
            return event;
        }
    }
}

/// Assert nothing arrives on `rx` within `wait`.
pub async fn assert_no_event(rx: &mut mpsc::Receiver<ServerEvent>, wait: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("unexpected outbound event: {event:?}");
    }
}

/// Everything currently queued on `rx`, without waiting.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
