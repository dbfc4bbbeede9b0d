//! Messages exchanged between actors, and the domain types they carry.

use crate::actors::connection::ConnectionHandle;
use crate::errors::CoordinatorError;
use crate::events::ServerEvent;
use chrono::{DateTime, Utc};
use media_engine::{MediaKind, ProducerId};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// A participant's role within a room.
///
/// Exactly one member holds [`Role::Host`] at a time; a later joiner
/// asking for host while one is present is admitted as an attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Attendee,
}

impl Role {
    #[must_use]
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

/// Room lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomPhase {
    /// Created, waiting for the host to arrive.
    Forming,
    /// Host present (or has been present); meeting in progress.
    Active,
    /// Terminal. An ended room never accepts another join.
    Ended,
}

/// Membership entry as exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub connection_id: Uuid,
    pub display_name: String,
    pub role: Role,
}

/// One chat message in a room's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub sender: Uuid,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// A producer visible to room members, keyed to its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerAnnouncement {
    pub connection_id: Uuid,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// Which signaling message a relay request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Wrap a relayed payload in the outbound event for this kind.
    #[must_use]
    pub fn into_event(self, sender: Uuid, payload: serde_json::Value) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::Offer { sender, payload },
            SignalKind::Answer => ServerEvent::Answer { sender, payload },
            SignalKind::IceCandidate => ServerEvent::IceCandidate { sender, payload },
        }
    }
}

/// Point-in-time view of a room, for the HTTP status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateSnapshot {
    pub room_id: Uuid,
    pub code: String,
    pub phase: RoomPhase,
    pub participant_count: usize,
    pub host_present: bool,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a meeting through the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub title: String,
    pub host_name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

/// Result of a successful room creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub room_id: Uuid,
    pub code: String,
}

/// Registry-level counters, for the HTTP status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub active_rooms: usize,
    pub rooms_created_total: u64,
    pub rooms_evicted_total: u64,
}

/// Messages handled by the room registry actor.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Allocate a code and spawn a room for it.
    CreateRoom {
        request: CreateRoomRequest,
        respond_to: oneshot::Sender<Result<RoomCreated, CoordinatorError>>,
    },

    /// Look up a live room by code, materializing a scheduled meeting
    /// if the directory knows the code but no room is running yet.
    Resolve {
        code: String,
        respond_to: oneshot::Sender<Result<crate::actors::room::RoomHandle, CoordinatorError>>,
    },

    /// Remove a room whose task has finished. Idempotent.
    Evict { room_id: Uuid },

    /// Registry counters.
    Status {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Messages handled by a room actor.
#[derive(Debug)]
pub enum RoomMessage {
    /// Admit a connection. The room delivers the `joined` snapshot
    /// through the connection's own mailbox before any subsequent
    /// broadcast, so the snapshot cannot be overtaken.
    Join {
        connection_id: Uuid,
        display_name: String,
        wants_host: bool,
        handle: ConnectionHandle,
        respond_to: oneshot::Sender<Result<Role, CoordinatorError>>,
    },

    /// Remove a member. Idempotent; unknown ids are ignored.
    Leave { connection_id: Uuid },

    /// Append to the transcript and fan out to every member.
    ///
    /// Request messages carry the sender's handle so a refusal still
    /// reaches a sender the room no longer (or never) tracked.
    Chat {
        sender: Uuid,
        handle: ConnectionHandle,
        text: String,
    },

    /// Relay an addressed signaling payload to one member.
    Signal {
        sender: Uuid,
        handle: ConnectionHandle,
        target: Uuid,
        kind: SignalKind,
        payload: serde_json::Value,
    },

    /// Allocate a media transport for this member.
    CreateTransport {
        sender: Uuid,
        handle: ConnectionHandle,
    },

    /// Complete the DTLS handshake for this member's transport.
    ConnectTransport {
        sender: Uuid,
        handle: ConnectionHandle,
        dtls_parameters: serde_json::Value,
    },

    /// Start producing media. Host only.
    Produce {
        sender: Uuid,
        handle: ConnectionHandle,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    },

    /// Consume a producer through this member's transport.
    Consume {
        sender: Uuid,
        handle: ConnectionHandle,
        producer_id: ProducerId,
        rtp_capabilities: serde_json::Value,
    },

    /// Host mute-state change, fanned out to attendees.
    ToggleMedia {
        sender: Uuid,
        handle: ConnectionHandle,
        kind: MediaKind,
        muted: bool,
    },

    /// End the meeting for everyone. Host only.
    EndMeeting {
        sender: Uuid,
        handle: ConnectionHandle,
    },

    /// Point-in-time room state.
    Snapshot {
        respond_to: oneshot::Sender<RoomStateSnapshot>,
    },
}

/// Messages handled by a connection actor.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Push one event to the client.
    Deliver(ServerEvent),

    /// Flush and close the socket.
    Close,
}
