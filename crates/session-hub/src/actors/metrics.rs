//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds per actor type:
//!
//! | Actor Type | Elevated | Critical |
//! |------------|----------|----------|
//! | Registry   | > 200    | > 1000   |
//! | Room       | > 100    | > 500    |
//! | Connection | > 50     | > 200    |
//!
//! Depths are exported as `hub_actor_mailbox_depth{actor_type}`; room and
//! connection counts drive `hub_rooms_active` and `hub_connections_active`.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Registry,
    Room,
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    /// `(elevated, critical)` mailbox depths.
    #[must_use]
    pub const fn thresholds(&self) -> (usize, usize) {
        match self {
            ActorType::Registry => (200, 1000),
            ActorType::Room => (100, 500),
            ActorType::Connection => (50, 200),
        }
    }
}

/// Mailbox pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Critical,
}

/// Tracks one actor's queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Session id, connection id, or hub id.
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        let (elevated, critical) = self.actor_type.thresholds();
        if depth > critical {
            warn!(
                target: "hub.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = depth,
                threshold = critical,
                "Mailbox depth critical"
            );
        } else if depth == elevated + 1 {
            debug!(
                target: "hub.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = depth,
                "Mailbox depth elevated"
            );
        }
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);
    }

    pub fn record_dequeue(&self) {
        let depth = decrement(&self.depth);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        let depth = self.current_depth();
        let (elevated, critical) = self.actor_type.thresholds();
        if depth > critical {
            MailboxLevel::Critical
        } else if depth > elevated {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Hub-wide actor counters, shared by every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_rooms: AtomicUsize,
    active_connections: AtomicUsize,
    actor_panics: AtomicU64,
    messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let count = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_rooms_active(count);
    }

    pub fn room_removed(&self) {
        prom::set_rooms_active(decrement(&self.active_rooms));
    }

    pub fn connection_created(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_connections_active(count);
    }

    pub fn connection_closed(&self) {
        prom::set_connections_active(decrement(&self.active_connections));
    }

    /// A spawned actor task ended in a panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "hub.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor task panicked"
        );
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }
}

/// Decrement without wrapping below zero; returns the new value.
fn decrement(counter: &AtomicUsize) -> usize {
    let previous = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
        .unwrap_or_else(|n| n);
    previous.saturating_sub(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_and_peak() {
        let monitor = MailboxMonitor::new(ActorType::Room, "session-123");

        for _ in 0..3 {
            monitor.record_enqueue();
        }
        monitor.record_dequeue();

        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_levels_follow_actor_thresholds() {
        let room = MailboxMonitor::new(ActorType::Room, "session-123");
        assert_eq!(room.level(), MailboxLevel::Normal);
        for _ in 0..150 {
            room.record_enqueue();
        }
        assert_eq!(room.level(), MailboxLevel::Elevated);

        let connection = MailboxMonitor::new(ActorType::Connection, "conn-1");
        for _ in 0..201 {
            connection.record_enqueue();
        }
        assert_eq!(connection.level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_dequeue_on_empty_saturates() {
        let monitor = MailboxMonitor::new(ActorType::Registry, "hub-1");
        monitor.record_enqueue();
        monitor.record_dequeue();
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_room_and_connection_counts() {
        let metrics = ActorMetrics::new();

        metrics.room_created();
        metrics.room_created();
        metrics.connection_created();
        metrics.room_removed();
        metrics.connection_closed();
        metrics.connection_closed();

        assert_eq!(metrics.room_count(), 1);
        assert_eq!(metrics.connection_count(), 0);
    }

    #[test]
    fn test_panics_and_messages_are_counted() {
        let metrics = ActorMetrics::new();
        metrics.record_panic(ActorType::Room);
        metrics.record_message_processed();
        metrics.record_message_processed();

        assert_eq!(metrics.panic_count(), 1);
        assert_eq!(metrics.messages_processed(), 2);
    }
}
