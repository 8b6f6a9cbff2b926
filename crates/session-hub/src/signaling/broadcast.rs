//! State broadcaster.
//!
//! Applies ephemeral UI state to the roster and fans the resulting event out
//! to the room. Reactions and chat reach the sender too; everything else
//! reaches only the other members.

use super::protocol::{
    ChatMessage, HandRaiseChanged, MediaStateChanged, Reaction, ScreenShare, SendMessage,
    SendReaction, ServerEvent,
};
use crate::actors::roster::Roster;
use chrono::Utc;
use uuid::Uuid;

/// Room-state events a member may broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    MediaState(MediaStateChanged),
    HandRaise(HandRaiseChanged),
    Reaction(SendReaction),
    Chat(SendMessage),
    ScreenShareStarted(ScreenShare),
    ScreenShareStopped(ScreenShare),
}

impl RoomEvent {
    /// User the event claims to come from.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            RoomEvent::MediaState(e) => &e.user_id,
            RoomEvent::HandRaise(e) => &e.user_id,
            RoomEvent::Reaction(e) => &e.user_id,
            RoomEvent::Chat(e) => &e.user_id,
            RoomEvent::ScreenShareStarted(e) | RoomEvent::ScreenShareStopped(e) => &e.user_id,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            RoomEvent::MediaState(e) => &e.session_id,
            RoomEvent::HandRaise(e) => &e.session_id,
            RoomEvent::Reaction(e) => &e.session_id,
            RoomEvent::Chat(e) => &e.session_id,
            RoomEvent::ScreenShareStarted(e) | RoomEvent::ScreenShareStopped(e) => &e.session_id,
        }
    }

    #[must_use]
    pub fn audience(&self) -> Audience {
        match self {
            RoomEvent::Reaction(_) | RoomEvent::Chat(_) => Audience::Everyone,
            _ => Audience::Others,
        }
    }
}

/// Who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Others,
}

/// Apply `event` to the sender's roster row and build the outgoing event.
///
/// Missing display names are filled from the roster. Reactions and chat are
/// stamped with a fresh id and the current time.
pub fn apply(roster: &mut Roster, event: RoomEvent) -> ServerEvent {
    let display_name = roster
        .get(event.user_id())
        .map(|p| p.display_name.clone())
        .unwrap_or_default();
    let fill = |name: String| if name.is_empty() { display_name.clone() } else { name };

    match event {
        RoomEvent::MediaState(e) => {
            if let Some(p) = roster.get_mut(&e.user_id) {
                p.mic_on = e.mic_on;
                p.camera_on = e.camera_on;
            }
            ServerEvent::MediaStateChanged(e)
        }
        RoomEvent::HandRaise(mut e) => {
            if let Some(p) = roster.get_mut(&e.user_id) {
                p.hand_raised = e.hand_raised;
            }
            e.user_name = fill(e.user_name);
            ServerEvent::HandRaiseChanged(e)
        }
        RoomEvent::Reaction(e) => ServerEvent::NewReaction(Reaction {
            id: Uuid::new_v4().to_string(),
            session_id: e.session_id,
            user_id: e.user_id,
            user_name: fill(e.user_name),
            emoji: e.emoji,
            timestamp: Utc::now(),
        }),
        RoomEvent::Chat(e) => ServerEvent::NewMessage(ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: e.session_id,
            user_id: e.user_id,
            user_name: fill(e.user_name),
            message: e.message,
            timestamp: Utc::now(),
        }),
        RoomEvent::ScreenShareStarted(mut e) => {
            if let Some(p) = roster.get_mut(&e.user_id) {
                p.is_presenting = true;
            }
            e.user_name = fill(e.user_name);
            ServerEvent::ScreenShareStarted(e)
        }
        RoomEvent::ScreenShareStopped(mut e) => {
            if let Some(p) = roster.get_mut(&e.user_id) {
                p.is_presenting = false;
            }
            e.user_name = fill(e.user_name);
            ServerEvent::ScreenShareStopped(e)
        }
    }
}

/// Deliver `event` to the room. Returns how many queues accepted it.
pub fn fan_out(roster: &Roster, sender: &str, event: &ServerEvent, audience: Audience) -> usize {
    roster
        .iter()
        .filter(|p| audience == Audience::Everyone || p.user_id != sender)
        .filter(|p| p.connection.deliver(event.clone()).is_queued())
        .count()
}
