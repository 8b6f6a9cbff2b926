//! Metrics definitions for the session hub.
//!
//! All metrics follow Prometheus naming conventions:
//! - `hub_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 3 values (registry, room, connection)
//! - `event`: bounded by the client event set (~12 values)
//! - `operation`: bounded by `SessionStore` methods (~10 values)
//! - `reason`: bounded drop reasons (queue_full, connection_closed)
//! - `to`: 4 lifecycle states
//! - `error_type`: bounded by `HubError` variants
//!
//! Session ids and user ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Message handling latency - in-process, should be well under 100ms
        .set_buckets_for_metric(
            Matcher::Prefix("hub_message".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        // Store latency buckets - internal service call (like DB queries)
        .set_buckets_for_metric(
            Matcher::Prefix("hub_store".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connection & Room Metrics (Gauges)
// ============================================================================

/// Set the number of active client connections.
///
/// Metric: `hub_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_connections_active").set(count as f64);
}

/// Set the number of live rooms.
///
/// Metric: `hub_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `hub_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record how long the hub took to handle one client event.
///
/// Metric: `hub_message_latency_seconds`
/// Labels: `event`
pub fn record_message_latency(event: &str, duration: Duration) {
    histogram!("hub_message_latency_seconds", "event" => event.to_string())
        .record(duration.as_secs_f64());
}

/// Record session store operation latency.
///
/// Metric: `hub_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_latency(operation: &str, duration: Duration) {
    histogram!("hub_store_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Delivery Metrics (Counters)
// ============================================================================

/// Record an outbound event that never reached a connection's queue.
///
/// Metric: `hub_messages_dropped_total`
/// Labels: `reason` (queue_full, connection_closed)
pub fn record_message_dropped(reason: &str) {
    counter!("hub_messages_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a directed signal whose recipient had no live connection.
///
/// Metric: `hub_signaling_undeliverable_total`
pub fn record_signaling_undeliverable() {
    counter!("hub_signaling_undeliverable_total").increment(1);
}

/// Record an attendance write from the live path that failed to persist.
///
/// Metric: `hub_attendance_persist_failures_total`
/// Labels: `operation` (enqueue, add_participant, open_interval, close_interval)
///
/// Non-zero values mean attendance reads may undercount.
pub fn record_attendance_persist_failure(operation: &str) {
    counter!("hub_attendance_persist_failures_total", "operation" => operation.to_string())
        .increment(1);
}

// ============================================================================
// Lifecycle & Error Metrics
// ============================================================================

/// Record a completed lifecycle transition.
///
/// Metric: `hub_lifecycle_transitions_total`
/// Labels: `to`
pub fn record_lifecycle_transition(to: &str) {
    counter!("hub_lifecycle_transitions_total", "to" => to.to_string()).increment(1);
}

/// Record an error returned to a client.
///
/// Metric: `hub_errors_total`
/// Labels: `error_type`
pub fn record_error(error_type: &str) {
    counter!("hub_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Record an actor panic event.
///
/// Metric: `hub_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("hub_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}
