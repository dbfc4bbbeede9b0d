//! Engine handle types.
//!
//! Handles are opaque identifiers minted by the engine. The coordinator
//! stores and forwards them; it never derives meaning from their form.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! handle_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh handle.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

handle_id!(RouterId, "Room-level router handle.");
handle_id!(TransportId, "Bidirectional transport handle.");
handle_id!(ProducerId, "Outbound media producer handle.");
handle_id!(ConsumerId, "Inbound media consumer handle.");

/// Media kind for producers and consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a wire/metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of creating a transport: the handle plus the negotiation
/// parameters the client needs (ICE parameters/candidates, DTLS
/// fingerprints). The parameter blob is opaque to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportCreated {
    pub id: TransportId,
    pub negotiation: serde_json::Value,
}

/// Result of creating a consumer: the handle plus the RTP parameters
/// the client needs to receive the producer's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerCreated {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub params: serde_json::Value,
}
