//! Live-path routing: wire protocol, signaling relay and state broadcast.
//!
//! Rooms deliver to peers through [`ConnectionHandle`], the sending half of a
//! connection's bounded outbound queue. Delivery is always `try_send`; a room
//! never waits on a slow peer.

pub mod broadcast;
pub mod protocol;
pub mod relay;

use crate::config::OverflowPolicy;
use crate::observability::metrics::record_message_dropped;
use protocol::ServerEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Result of offering one event to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued for the socket writer.
    Queued,
    /// Queue was full; the overflow policy was applied.
    Overflowed,
    /// The connection is gone.
    Closed,
}

impl Delivery {
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued)
    }
}

/// Sending half of one live connection's outbound queue.
///
/// Identified by `connection_id`; a reconnect produces a new handle and the
/// room replaces the old one.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: String,
    sender: mpsc::Sender<ServerEvent>,
    cancel_token: CancellationToken,
    overflow_policy: OverflowPolicy,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(
        connection_id: impl Into<String>,
        sender: mpsc::Sender<ServerEvent>,
        cancel_token: CancellationToken,
        overflow_policy: OverflowPolicy,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            sender,
            cancel_token,
            overflow_policy,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Offer `event` without waiting.
    ///
    /// A full queue either drops the event or disconnects the peer,
    /// depending on the overflow policy.
    pub fn deliver(&self, event: ServerEvent) -> Delivery {
        match self.sender.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(event)) => {
                record_message_dropped("queue_full");
                warn!(
                    target: "hub.signaling",
                    connection_id = %self.connection_id,
                    event = event.name(),
                    policy = self.overflow_policy.as_str(),
                    "Outbound queue full"
                );
                if self.overflow_policy == OverflowPolicy::Disconnect {
                    self.cancel_token.cancel();
                }
                Delivery::Overflowed
            }
            Err(TrySendError::Closed(_)) => {
                record_message_dropped("connection_closed");
                Delivery::Closed
            }
        }
    }

    /// Ask the connection to close.
    pub fn disconnect(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }
}
