//! Session Coordinator error types.
//!
//! Every error here is recoverable at the request boundary: it is
//! reported to the originating connection as a single `error` event and
//! never tears down the room or other participants' state. Internal
//! details are logged server-side but not exposed to clients.

use media_engine::EngineError;
use thiserror::Error;

/// Session Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Room absent, ended, or evicted.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The named participant is not in the room.
    #[error("participant not found")]
    ParticipantNotFound,

    /// The sender is not a member of the room it addressed.
    #[error("not a member of this room")]
    NotAMember,

    /// Relay target is not a current member of the sender's room.
    #[error("invalid relay target")]
    InvalidTarget,

    /// The referenced producer is absent or its owner has left.
    #[error("producer not found")]
    ProducerNotFound,

    /// Non-host attempting a host-only action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Duplicate join from an already-member connection, or a room
    /// code collision on explicit creation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A scheduled meeting has not started and the caller is not the
    /// host.
    #[error("meeting has not started yet")]
    NotYetStarted,

    /// Code generation could not find a free code.
    #[error("room code space exhausted")]
    AllocationExhausted,

    /// Media Routing Engine call failed.
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    /// The deployment's topology does not support this operation.
    #[error("unsupported in this topology: {0}")]
    Unsupported(String),

    /// Channel send/receive failure inside the actor system.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns a stable label for logging and client error payloads.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            CoordinatorError::RoomNotFound(_) => "room-not-found",
            CoordinatorError::ParticipantNotFound => "participant-not-found",
            CoordinatorError::NotAMember => "not-a-member",
            CoordinatorError::InvalidTarget => "invalid-target",
            CoordinatorError::ProducerNotFound => "producer-not-found",
            CoordinatorError::Unauthorized(_) => "unauthorized",
            CoordinatorError::Conflict(_) => "conflict",
            CoordinatorError::NotYetStarted => "not-yet-started",
            CoordinatorError::AllocationExhausted => "allocation-exhausted",
            CoordinatorError::Engine(_) => "engine-failure",
            CoordinatorError::Unsupported(_) => "unsupported",
            CoordinatorError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::RoomNotFound(_) => "Meeting not found".to_string(),
            CoordinatorError::ParticipantNotFound => "Participant not found".to_string(),
            CoordinatorError::NotAMember => "You are not in this meeting".to_string(),
            CoordinatorError::InvalidTarget => "Target is not in this meeting".to_string(),
            CoordinatorError::ProducerNotFound => "Producer not found".to_string(),
            CoordinatorError::NotYetStarted => "Meeting is not yet started".to_string(),
            CoordinatorError::AllocationExhausted => {
                "Could not allocate a meeting code, try again".to_string()
            }
            CoordinatorError::Engine(_) | CoordinatorError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            CoordinatorError::Unauthorized(msg)
            | CoordinatorError::Conflict(msg)
            | CoordinatorError::Unsupported(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            CoordinatorError::RoomNotFound("123456".to_string()).code(),
            "room-not-found"
        );
        assert_eq!(CoordinatorError::InvalidTarget.code(), "invalid-target");
        assert_eq!(
            CoordinatorError::AllocationExhausted.code(),
            "allocation-exhausted"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = CoordinatorError::Internal("oneshot receive failed at room 483920".to_string());
        assert!(!err.client_message().contains("483920"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let engine_err = CoordinatorError::Engine(EngineError::Rejected(
            "incompatible capabilities: profile-level-id mismatch".to_string(),
        ));
        assert_eq!(engine_err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_room_not_found_message_omits_code() {
        let err = CoordinatorError::RoomNotFound("765432".to_string());
        assert!(!err.client_message().contains("765432"));
    }

    #[test]
    fn test_engine_error_conversion() {
        let err: CoordinatorError = EngineError::Rejected("cannot consume".to_string()).into();
        assert!(matches!(err, CoordinatorError::Engine(_)));
        assert_eq!(err.code(), "engine-failure");
    }
}
