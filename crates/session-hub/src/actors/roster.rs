//! Live roster of one room.
//!
//! Owned exclusively by the room actor. Rows are kept in join order and are
//! unique per user; a reconnect replaces the row's connection handle in
//! place instead of adding a second row.

use crate::signaling::protocol::ParticipantView;
use crate::signaling::ConnectionHandle;
use chrono::{DateTime, Utc};

/// Identity supplied with a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInit {
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
}

/// One row of the live roster.
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
    pub connection: ConnectionHandle,
    pub mic_on: bool,
    pub camera_on: bool,
    pub hand_raised: bool,
    pub is_presenting: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    #[must_use]
    pub fn view(&self) -> ParticipantView {
        ParticipantView {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            is_host: self.is_host,
            mic_on: self.mic_on,
            camera_on: self.camera_on,
            hand_raised: self.hand_raised,
            is_presenting: self.is_presenting,
        }
    }
}

/// What an upsert did to the roster.
#[derive(Debug)]
pub enum Upsert {
    /// New row appended.
    Added,
    /// Existing row now points at a new connection; carries the old handle.
    Superseded(ConnectionHandle),
    /// Same connection joined again; identity refreshed.
    Refreshed,
}

/// Ordered, user-unique participant list.
#[derive(Debug, Default)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `init` or update the existing row for the same user.
    ///
    /// Media, hand and presenting flags survive a reconnect.
    pub fn upsert(
        &mut self,
        init: ParticipantInit,
        connection: ConnectionHandle,
        joined_at: DateTime<Utc>,
    ) -> Upsert {
        if let Some(existing) = self.get_mut(&init.user_id) {
            existing.display_name = init.display_name;
            existing.is_host = init.is_host;
            if existing.connection.connection_id() == connection.connection_id() {
                return Upsert::Refreshed;
            }
            let old = std::mem::replace(&mut existing.connection, connection);
            return Upsert::Superseded(old);
        }

        self.participants.push(Participant {
            user_id: init.user_id,
            display_name: init.display_name,
            is_host: init.is_host,
            connection,
            mic_on: false,
            camera_on: false,
            hand_raised: false,
            is_presenting: false,
            joined_at,
        });
        Upsert::Added
    }

    /// Remove `user_id` only if `connection_id` is still its current handle.
    ///
    /// A superseded connection tearing down must not remove its successor.
    pub fn remove_if_current(&mut self, user_id: &str, connection_id: &str) -> Option<Participant> {
        let index = self.participants.iter().position(|p| {
            p.user_id == user_id && p.connection.connection_id() == connection_id
        })?;
        Some(self.participants.remove(index))
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn get_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    /// Current handle for `user_id`.
    #[must_use]
    pub fn resolve(&self, user_id: &str) -> Option<&ConnectionHandle> {
        self.get(user_id).map(|p| &p.connection)
    }

    /// Whether `connection_id` is the current handle for `user_id`.
    #[must_use]
    pub fn is_current(&self, user_id: &str, connection_id: &str) -> bool {
        self.resolve(user_id)
            .is_some_and(|c| c.connection_id() == connection_id)
    }

    #[must_use]
    pub fn views(&self) -> Vec<ParticipantView> {
        self.participants.iter().map(Participant::view).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Remove every row, in join order.
    pub fn drain(&mut self) -> impl Iterator<Item = Participant> + '_ {
        self.participants.drain(..)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
