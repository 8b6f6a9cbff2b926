//! Observability for the session hub.
//!
//! # Privacy by Default
//!
//! All instrumentation uses `#[instrument(skip_all)]` and explicit safe field
//! allow-listing: session ids, user ids and connection ids only. Signaling
//! payloads, chat text and the Redis URL are never recorded.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `hub_connections_active` | Gauge | none | Current client connections |
//! | `hub_rooms_active` | Gauge | none | Current live rooms |
//! | `hub_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `hub_message_latency_seconds` | Histogram | `event` | Client event handling latency |
//! | `hub_store_latency_seconds` | Histogram | `operation` | Session store latency |
//! | `hub_messages_dropped_total` | Counter | `reason` | Events not delivered to a peer queue |
//! | `hub_signaling_undeliverable_total` | Counter | none | Directed signals with no live recipient |
//! | `hub_attendance_persist_failures_total` | Counter | `operation` | Live-path attendance writes that failed |
//! | `hub_lifecycle_transitions_total` | Counter | `to` | Completed status transitions |
//! | `hub_errors_total` | Counter | `error_type` | Errors returned to clients |
//! | `hub_actor_panics_total` | Counter | `actor_type` | Actor panics (bugs) |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
