//! Wire protocol for live session connections.
//!
//! Every frame is a JSON text frame of the form
//! `{"event": "<kebab-name>", "data": {...}}` with camelCase data fields.
//!
//! Signaling payloads are carried as opaque JSON and relayed verbatim.

use crate::errors::HubError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted size of one inbound text frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    LeaveRoom(LeaveRoom),
    VideoOffer(SignalEnvelope),
    VideoAnswer(SignalEnvelope),
    IceCandidate(SignalEnvelope),
    MediaStateChanged(MediaStateChanged),
    HandRaiseChanged(HandRaiseChanged),
    SendReaction(SendReaction),
    SendMessage(SendMessage),
    ScreenShareStarted(ScreenShare),
    ScreenShareStopped(ScreenShare),
}

impl ClientEvent {
    /// Event name as it appears on the wire. Also the metrics label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::LeaveRoom(_) => "leave-room",
            ClientEvent::VideoOffer(_) => "video-offer",
            ClientEvent::VideoAnswer(_) => "video-answer",
            ClientEvent::IceCandidate(_) => "ice-candidate",
            ClientEvent::MediaStateChanged(_) => "media-state-changed",
            ClientEvent::HandRaiseChanged(_) => "hand-raise-changed",
            ClientEvent::SendReaction(_) => "send-reaction",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::ScreenShareStarted(_) => "screen-share-started",
            ClientEvent::ScreenShareStopped(_) => "screen-share-stopped",
        }
    }

    /// Decode one text frame.
    ///
    /// A `join-room` with absent or unusable data decodes to an empty join
    /// or fails as `MalformedJoin`, so it is reported the same way as a join
    /// missing identity fields.
    pub fn decode(text: &str) -> Result<Self, HubError> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(HubError::Validation(format!(
                "Frame exceeds {MAX_FRAME_BYTES} bytes"
            )));
        }
        let frame: Frame = serde_json::from_str(text).map_err(malformed)?;
        if frame.event == "join-room" {
            if frame.data.is_null() {
                return Ok(ClientEvent::JoinRoom(JoinRoom::default()));
            }
            return serde_json::from_value(frame.data)
                .map(ClientEvent::JoinRoom)
                .map_err(|e| HubError::MalformedJoin(format!("Invalid join-room data: {e}")));
        }
        serde_json::from_str(text).map_err(malformed)
    }
}

/// Envelope read before the event-specific data.
#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn malformed(e: serde_json::Error) -> HubError {
    HubError::Validation(format!("Malformed event: {e}"))
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ParticipantList(Vec<ParticipantView>),
    UserJoined(ParticipantView),
    UserLeft(UserLeft),
    VideoOffer(SignalEnvelope),
    VideoAnswer(SignalEnvelope),
    IceCandidate(SignalEnvelope),
    MediaStateChanged(MediaStateChanged),
    HandRaiseChanged(HandRaiseChanged),
    NewReaction(Reaction),
    NewMessage(ChatMessage),
    ScreenShareStarted(ScreenShare),
    ScreenShareStopped(ScreenShare),
    SessionSuperseded(SessionSuperseded),
    Error(ErrorEvent),
}

impl ServerEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::ParticipantList(_) => "participant-list",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::VideoOffer(_) => "video-offer",
            ServerEvent::VideoAnswer(_) => "video-answer",
            ServerEvent::IceCandidate(_) => "ice-candidate",
            ServerEvent::MediaStateChanged(_) => "media-state-changed",
            ServerEvent::HandRaiseChanged(_) => "hand-raise-changed",
            ServerEvent::NewReaction(_) => "new-reaction",
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::ScreenShareStarted(_) => "screen-share-started",
            ServerEvent::ScreenShareStopped(_) => "screen-share-stopped",
            ServerEvent::SessionSuperseded(_) => "session-superseded",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Error event for a failed client action.
    #[must_use]
    pub fn error(err: &HubError, event: Option<&str>) -> Self {
        let to = match err {
            HubError::RecipientUnreachable { to } => Some(to.clone()),
            _ => None,
        };
        ServerEvent::Error(ErrorEvent {
            code: err.error_code().to_string(),
            message: err.client_message(),
            to,
            event: event.map(str::to_string),
        })
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, HubError> {
        serde_json::to_string(self)
            .map_err(|e| HubError::Internal(format!("event encoding failed: {e}")))
    }
}

/// `join-room` data.
///
/// Identity fields default to empty so a missing field surfaces as
/// `MALFORMED_JOIN` rather than a generic decode error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    /// Advisory; host status is taken from the session record.
    #[serde(default)]
    pub is_host: bool,
}

impl JoinRoom {
    /// Reject joins missing identity fields.
    pub fn validate(&self) -> Result<(), HubError> {
        let missing: Vec<&str> = [
            ("sessionId", &self.session_id),
            ("userId", &self.user_id),
            ("username", &self.username),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HubError::MalformedJoin(format!(
                "Missing {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    pub session_id: String,
}

/// Envelope for `video-offer`, `video-answer` and `ice-candidate`.
///
/// `to` absent means "everyone else in the room".
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Which handshake message an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "video-offer",
            SignalKind::Answer => "video-answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }

    /// Wrap `envelope` in the matching server event.
    #[must_use]
    pub fn into_event(self, envelope: SignalEnvelope) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::VideoOffer(envelope),
            SignalKind::Answer => ServerEvent::VideoAnswer(envelope),
            SignalKind::IceCandidate => ServerEvent::IceCandidate(envelope),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStateChanged {
    pub session_id: String,
    pub user_id: String,
    pub mic_on: bool,
    pub camera_on: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandRaiseChanged {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub hand_raised: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReaction {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenShare {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

/// A roster row as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
    pub mic_on: bool,
    pub camera_on: bool,
    pub hand_raised: bool,
    pub is_presenting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub session_id: String,
    pub user_id: String,
}

/// `new-reaction` data; `id` and `timestamp` are stamped by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
}

/// `new-message` data; `id` and `timestamp` are stamped by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSuperseded {
    pub session_id: String,
}

/// `error` data. `to` names the unreachable recipient for signaling errors;
/// `event` names the client event that failed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join_room() {
        let event = ClientEvent::decode(
            r#"{"event":"join-room","data":{"sessionId":"s-1","userId":"u-1","username":"Ada","isHost":true}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom(JoinRoom {
                session_id: "s-1".to_string(),
                user_id: "u-1".to_string(),
                username: "Ada".to_string(),
                is_host: true,
            })
        );
        assert_eq!(event.name(), "join-room");
    }

    #[test]
    fn test_join_missing_identity_is_malformed() {
        let event =
            ClientEvent::decode(r#"{"event":"join-room","data":{"sessionId":"s-1"}}"#).unwrap();
        let name = event.name();
        let ClientEvent::JoinRoom(join) = event else {
            unreachable!("decoded {name} instead of join-room");
        };
        let err = join.validate().unwrap_err();
        assert!(matches!(err, HubError::MalformedJoin(ref m) if m.contains("userId")));
    }

    #[test]
    fn test_join_without_data_is_malformed() {
        for text in [
            r#"{"event":"join-room"}"#,
            r#"{"event":"join-room","data":null}"#,
        ] {
            let event = ClientEvent::decode(text).unwrap();
            let ClientEvent::JoinRoom(join) = event else {
                unreachable!("{text} did not decode to join-room");
            };
            assert_eq!(join, JoinRoom::default());
            let err = join.validate().unwrap_err();
            assert_eq!(err.error_code(), "MALFORMED_JOIN");
        }
    }

    #[test]
    fn test_join_with_wrong_data_shape_is_malformed() {
        let err = ClientEvent::decode(r#"{"event":"join-room","data":"s-1"}"#).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_JOIN");

        let err = ClientEvent::decode(r#"{"event":"leave-room","data":null}"#).unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");

        let err = ClientEvent::decode(r#"{"data":{}}"#).unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    #[test]
    fn test_signal_payload_is_opaque() {
        let payload = json!({"type": "offer", "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1", "extra": [1, 2]});
        let text = json!({
            "event": "video-offer",
            "data": {"from": "b", "to": "a", "sessionId": "s-1", "payload": payload}
        })
        .to_string();

        let event = ClientEvent::decode(&text).unwrap();
        let name = event.name();
        let ClientEvent::VideoOffer(envelope) = event else {
            unreachable!("decoded {name} instead of video-offer");
        };
        assert_eq!(envelope.payload, payload);

        let relayed = SignalKind::Offer.into_event(envelope).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&relayed).unwrap();
        assert_eq!(value["event"], "video-offer");
        assert_eq!(value["data"]["payload"], payload);
    }

    #[test]
    fn test_broadcast_signal_omits_to() {
        let envelope = SignalEnvelope {
            from: "b".to_string(),
            to: None,
            session_id: "s-1".to_string(),
            payload: json!({"candidate": "x"}),
        };
        let text = SignalKind::IceCandidate.into_event(envelope).encode().unwrap();
        assert!(!text.contains("\"to\""));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = ClientEvent::decode(r#"{"event":"format-disk","data":{}}"#).unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
        assert!(ClientEvent::decode("not json").is_err());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let big = "x".repeat(MAX_FRAME_BYTES + 1);
        assert!(matches!(
            ClientEvent::decode(&big),
            Err(HubError::Validation(_))
        ));
    }

    #[test]
    fn test_error_event_names_unreachable_recipient() {
        let err = HubError::RecipientUnreachable {
            to: "user-a".to_string(),
        };
        let event = ServerEvent::error(&err, Some("video-offer"));
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["code"], "RECIPIENT_UNREACHABLE");
        assert_eq!(value["data"]["to"], "user-a");
        assert_eq!(value["data"]["event"], "video-offer");
    }

    #[test]
    fn test_participant_list_shape() {
        let event = ServerEvent::ParticipantList(vec![ParticipantView {
            user_id: "a".to_string(),
            display_name: "Ada".to_string(),
            is_host: true,
            mic_on: false,
            camera_on: true,
            hand_raised: false,
            is_presenting: false,
        }]);
        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "participant-list");
        assert_eq!(value["data"][0]["userId"], "a");
        assert_eq!(value["data"][0]["cameraOn"], true);
    }
}
