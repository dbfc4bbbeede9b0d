//! Media Routing Engine abstraction.
//!
//! The session coordinator never inspects media bytes. It talks to an
//! engine (an SFU terminating DTLS/ICE and forwarding RTP) through the
//! [`MediaRoutingEngine`] trait and tracks only the opaque handles the
//! engine returns. Negotiation parameters (ICE/DTLS/RTP blobs) pass
//! through as untyped JSON.
//!
//! [`LocalEngine`] is an in-process implementation that mints handles
//! and tracks their liveness without moving any media. It backs the
//! test suite and deployments that run the coordinator without a
//! native engine attached.

#![warn(clippy::pedantic)]

pub mod engine;
pub mod local;
pub mod types;

pub use engine::{EngineError, MediaRoutingEngine};
pub use local::{EngineConfig, LocalEngine};
pub use types::{
    ConsumerCreated, ConsumerId, MediaKind, ProducerId, RouterId, TransportCreated, TransportId,
};
