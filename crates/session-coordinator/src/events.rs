//! Typed wire protocol for the WebSocket surface.
//!
//! Inbound and outbound events are closed tagged enums so the compiler
//! enforces exhaustive handling per connection state; there is no
//! string-keyed handler table. Event names and field casing match what
//! a browser client sends over the socket.
//!
//! Negotiation payloads (SDP, ICE candidates, DTLS/RTP parameters) are
//! opaque JSON: the coordinator forwards them without interpretation.

use crate::actors::messages::{ChatEntry, ParticipantInfo, ProducerAnnouncement, Role};
use media_engine::{ConsumerId, MediaKind, ProducerId, TransportId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events a client sends to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Join a room by code.
    Join {
        code: String,
        display_name: String,
        #[serde(default)]
        wants_host: bool,
    },

    /// Leave the current room without closing the socket.
    Leave,

    /// Send a chat message to the room.
    Chat { text: String },

    /// Relay a WebRTC offer to another member.
    Offer {
        target: Uuid,
        payload: serde_json::Value,
    },

    /// Relay a WebRTC answer to another member.
    Answer {
        target: Uuid,
        payload: serde_json::Value,
    },

    /// Relay an ICE candidate to another member.
    IceCandidate {
        target: Uuid,
        payload: serde_json::Value,
    },

    /// Request a media transport from the engine.
    CreateTransport,

    /// Complete the DTLS handshake for this connection's transport.
    ConnectTransport { dtls_parameters: serde_json::Value },

    /// Start producing media (host only).
    Produce {
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    },

    /// Start consuming a remote producer.
    Consume {
        producer_id: ProducerId,
        rtp_capabilities: serde_json::Value,
    },

    /// Host toggles their outbound audio.
    ToggleAudio { muted: bool },

    /// Host toggles their outbound video.
    ToggleVideo { muted: bool },

    /// Host ends the meeting for everyone.
    EndMeeting,
}

/// Events the coordinator sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Join succeeded: assigned role, current membership (excluding
    /// the joiner), the chat transcript, and the producers available
    /// to consume.
    Joined {
        code: String,
        room_id: Uuid,
        connection_id: Uuid,
        role: Role,
        participants: Vec<ParticipantInfo>,
        chat_log: Vec<ChatEntry>,
        producers: Vec<ProducerAnnouncement>,
    },

    /// Another participant joined the room.
    ParticipantJoined {
        connection_id: Uuid,
        display_name: String,
        role: Role,
    },

    /// Another participant left the room.
    ParticipantLeft { connection_id: Uuid },

    /// The host left; the meeting has no broadcaster.
    HostLeft,

    /// A chat message (delivered to every member, sender included).
    ChatMessage {
        #[serde(flatten)]
        entry: ChatEntry,
    },

    /// A relayed offer from another member.
    Offer {
        sender: Uuid,
        payload: serde_json::Value,
    },

    /// A relayed answer from another member.
    Answer {
        sender: Uuid,
        payload: serde_json::Value,
    },

    /// A relayed ICE candidate from another member.
    IceCandidate {
        sender: Uuid,
        payload: serde_json::Value,
    },

    /// A member started producing media; consume it if interested.
    NewProducer {
        connection_id: Uuid,
        producer_id: ProducerId,
        kind: MediaKind,
    },

    /// Transport created; negotiation parameters for the client.
    TransportCreated {
        id: TransportId,
        negotiation: serde_json::Value,
    },

    /// Transport DTLS handshake completed.
    TransportConnected,

    /// Producer created for this connection.
    ProducerCreated {
        producer_id: ProducerId,
        kind: MediaKind,
    },

    /// Consumer created for this connection.
    ConsumerCreated {
        id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        params: serde_json::Value,
    },

    /// The host toggled their audio.
    HostAudioToggled { muted: bool },

    /// The host toggled their video.
    HostVideoToggled { muted: bool },

    /// The meeting ended; the room is gone.
    MeetingEnded,

    /// A request failed. One per failed request, nothing half-applied.
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Build an error event from a coordinator error.
    #[must_use]
    pub fn error(err: &crate::errors::CoordinatorError) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.client_message(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_event_parses_wire_shape() {
        let raw = json!({
            "type": "join",
            "code": "483920",
            "displayName": "Alice",
            "wantsHost": true,
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::Join {
                code,
                display_name,
                wants_host,
            } => {
                assert_eq!(code, "483920");
                assert_eq!(display_name, "Alice");
                assert!(wants_host);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_wants_host_defaults_to_false() {
        let raw = json!({ "type": "join", "code": "483920", "displayName": "Bob" });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            event,
            ClientEvent::Join {
                wants_host: false,
                ..
            }
        ));
    }

    #[test]
    fn test_relay_events_keep_payload_opaque() {
        let target = Uuid::new_v4();
        let raw = json!({
            "type": "ice-candidate",
            "target": target,
            "payload": { "candidate": "candidate:0 1 UDP 2122 192.0.2.1 54400 typ host" },
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::IceCandidate { target: t, payload } => {
                assert_eq!(t, target);
                assert!(payload.get("candidate").is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_tags_are_kebab_case() {
        let event = ServerEvent::ParticipantLeft {
            connection_id: Uuid::new_v4(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "participant-left");
        assert!(value.get("connectionId").is_some());

        let event = ServerEvent::MeetingEnded;
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "meeting-ended");
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let raw = json!({ "type": "eval", "code": "alert(1)" });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }
}
