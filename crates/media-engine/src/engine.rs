//! The `MediaRoutingEngine` trait.
//!
//! Mirrors the primitives of an SFU-style engine: a router per room,
//! a transport per participant, producers for outbound media and
//! consumers for inbound media. Close calls tolerate already-closed
//! handles so teardown paths can be retried safely.

use crate::types::{
    ConsumerCreated, ConsumerId, MediaKind, ProducerId, RouterId, TransportCreated, TransportId,
};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors from engine calls.
///
/// All variants are recoverable at the request boundary except
/// [`EngineError::Startup`], which is fatal: a coordinator whose engine
/// failed to initialize cannot serve any room.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine-level initialization failed (worker did not start).
    #[error("engine startup failed: {0}")]
    Startup(String),

    /// The referenced handle does not exist or is already closed.
    #[error("unknown {kind} handle: {id}")]
    UnknownHandle { kind: &'static str, id: String },

    /// The engine rejected the operation (e.g. incompatible
    /// capabilities on consume).
    #[error("engine rejected call: {0}")]
    Rejected(String),
}

/// Engine abstraction the coordinator programs against.
///
/// Implementations must be safe to share across room actors; every
/// method takes `&self`.
#[async_trait]
pub trait MediaRoutingEngine: Send + Sync {
    /// Create the room-level router.
    async fn create_router(&self, room_id: Uuid) -> Result<RouterId, EngineError>;

    /// Create a transport on a router, returning the handle and the
    /// negotiation parameters for the client.
    async fn create_transport(&self, router: RouterId) -> Result<TransportCreated, EngineError>;

    /// Complete the DTLS handshake for a transport with the client's
    /// parameters.
    async fn connect_transport(
        &self,
        transport: TransportId,
        dtls_parameters: serde_json::Value,
    ) -> Result<(), EngineError>;

    /// Create an outbound producer on a transport.
    async fn produce(
        &self,
        transport: TransportId,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<ProducerId, EngineError>;

    /// Create a consumer on a transport for a remote producer.
    async fn consume(
        &self,
        transport: TransportId,
        producer: ProducerId,
        rtp_capabilities: serde_json::Value,
    ) -> Result<ConsumerCreated, EngineError>;

    /// Close a consumer. No-op if already closed.
    async fn close_consumer(&self, id: ConsumerId);

    /// Close a producer. No-op if already closed.
    async fn close_producer(&self, id: ProducerId);

    /// Close a transport and everything it carries. No-op if already
    /// closed.
    async fn close_transport(&self, id: TransportId);

    /// Close a router and everything below it. No-op if already
    /// closed.
    async fn close_router(&self, id: RouterId);
}
