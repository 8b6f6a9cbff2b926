//! Signaling relay.
//!
//! Routes `video-offer`, `video-answer` and `ice-candidate` envelopes between
//! peers. The payload is never inspected. Recipients are resolved against the
//! roster at delivery time, so a reconnected recipient is always reached on
//! its current handle.

use super::protocol::{SignalEnvelope, SignalKind};
use crate::actors::roster::Roster;
use crate::errors::HubError;
use crate::observability::metrics::record_signaling_undeliverable;
use tracing::debug;

/// Where a relayed envelope went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Unicast delivered to the recipient's current connection.
    Delivered { connection_id: String },
    /// No `to`; fanned out to every other member.
    Broadcast { recipients: usize },
}

/// Relay one envelope within `roster`.
///
/// With `to` set, fails with `RecipientUnreachable` when the recipient has no
/// live handle in the room or its queue rejects the event.
pub fn relay(
    roster: &Roster,
    kind: SignalKind,
    envelope: SignalEnvelope,
) -> Result<RelayOutcome, HubError> {
    match envelope.to.clone() {
        Some(to) => {
            let Some(handle) = roster.resolve(&to) else {
                record_signaling_undeliverable();
                debug!(
                    target: "hub.signaling.relay",
                    session_id = %envelope.session_id,
                    signal = kind.as_str(),
                    roster_size = roster.len(),
                    "Recipient not in room"
                );
                return Err(HubError::RecipientUnreachable { to });
            };

            if handle.deliver(kind.into_event(envelope)).is_queued() {
                Ok(RelayOutcome::Delivered {
                    connection_id: handle.connection_id().to_string(),
                })
            } else {
                record_signaling_undeliverable();
                Err(HubError::RecipientUnreachable { to })
            }
        }
        None => {
            let from = envelope.from.clone();
            let event = kind.into_event(envelope);
            let recipients = roster
                .iter()
                .filter(|p| p.user_id != from)
                .filter(|p| p.connection.deliver(event.clone()).is_queued())
                .count();
            Ok(RelayOutcome::Broadcast { recipients })
        }
    }
}
