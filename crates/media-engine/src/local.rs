//! In-process engine implementation.
//!
//! `LocalEngine` does no media work. It mints handles, tracks which
//! are live, and enforces the same reference validity an SFU would:
//! a transport must belong to a live router, a consumer to a live
//! producer. Close calls cascade downward and are idempotent.

use crate::engine::{EngineError, MediaRoutingEngine};
use crate::types::{
    ConsumerCreated, ConsumerId, MediaKind, ProducerId, RouterId, TransportCreated, TransportId,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lower bound of the RTC port range.
    pub rtc_port_min: u16,
    /// Upper bound of the RTC port range.
    pub rtc_port_max: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rtc_port_min: 10_000,
            rtc_port_max: 10_100,
        }
    }
}

#[derive(Default)]
struct LocalState {
    /// router -> owning room.
    routers: HashMap<RouterId, Uuid>,
    /// transport -> parent router.
    transports: HashMap<TransportId, RouterId>,
    /// producer -> (parent transport, kind).
    producers: HashMap<ProducerId, (TransportId, MediaKind)>,
    /// consumer -> (parent transport, source producer).
    consumers: HashMap<ConsumerId, (TransportId, ProducerId)>,
}

/// In-process [`MediaRoutingEngine`].
pub struct LocalEngine {
    state: RwLock<LocalState>,
}

impl LocalEngine {
    /// Start the engine.
    ///
    /// Startup failure here is fatal to the process, matching the
    /// contract for a native engine worker failing to launch.
    pub fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        if config.rtc_port_min >= config.rtc_port_max {
            return Err(EngineError::Startup(format!(
                "invalid RTC port range {}..{}",
                config.rtc_port_min, config.rtc_port_max
            )));
        }

        Ok(Self {
            state: RwLock::new(LocalState::default()),
        })
    }

    /// Number of live handles, for teardown assertions.
    pub async fn live_handle_count(&self) -> usize {
        let state = self.state.read().await;
        state.routers.len() + state.transports.len() + state.producers.len()
            + state.consumers.len()
    }
}

#[async_trait]
impl MediaRoutingEngine for LocalEngine {
    async fn create_router(&self, room_id: Uuid) -> Result<RouterId, EngineError> {
        let id = RouterId::new();
        self.state.write().await.routers.insert(id, room_id);
        debug!(target: "engine.local", router = %id, room = %room_id, "router created");
        Ok(id)
    }

    async fn create_transport(&self, router: RouterId) -> Result<TransportCreated, EngineError> {
        let mut state = self.state.write().await;
        if !state.routers.contains_key(&router) {
            return Err(EngineError::UnknownHandle {
                kind: "router",
                id: router.to_string(),
            });
        }

        let id = TransportId::new();
        state.transports.insert(id, router);

        Ok(TransportCreated {
            id,
            negotiation: json!({
                "iceParameters": { "usernameFragment": Uuid::new_v4(), "password": Uuid::new_v4() },
                "iceCandidates": [],
                "dtlsParameters": { "role": "auto", "fingerprints": [] },
            }),
        })
    }

    async fn connect_transport(
        &self,
        transport: TransportId,
        _dtls_parameters: serde_json::Value,
    ) -> Result<(), EngineError> {
        let state = self.state.read().await;
        if !state.transports.contains_key(&transport) {
            return Err(EngineError::UnknownHandle {
                kind: "transport",
                id: transport.to_string(),
            });
        }
        Ok(())
    }

    async fn produce(
        &self,
        transport: TransportId,
        kind: MediaKind,
        _rtp_parameters: serde_json::Value,
    ) -> Result<ProducerId, EngineError> {
        let mut state = self.state.write().await;
        if !state.transports.contains_key(&transport) {
            return Err(EngineError::UnknownHandle {
                kind: "transport",
                id: transport.to_string(),
            });
        }

        let id = ProducerId::new();
        state.producers.insert(id, (transport, kind));
        debug!(target: "engine.local", producer = %id, kind = %kind, "producer created");
        Ok(id)
    }

    async fn consume(
        &self,
        transport: TransportId,
        producer: ProducerId,
        _rtp_capabilities: serde_json::Value,
    ) -> Result<ConsumerCreated, EngineError> {
        let mut state = self.state.write().await;
        if !state.transports.contains_key(&transport) {
            return Err(EngineError::UnknownHandle {
                kind: "transport",
                id: transport.to_string(),
            });
        }
        let Some(&(_, kind)) = state.producers.get(&producer) else {
            return Err(EngineError::UnknownHandle {
                kind: "producer",
                id: producer.to_string(),
            });
        };

        let id = ConsumerId::new();
        state.consumers.insert(id, (transport, producer));

        Ok(ConsumerCreated {
            id,
            producer_id: producer,
            kind,
            params: json!({ "rtpParameters": {} }),
        })
    }

    async fn close_consumer(&self, id: ConsumerId) {
        if self.state.write().await.consumers.remove(&id).is_none() {
            debug!(target: "engine.local", consumer = %id, "close on already-closed consumer");
        }
    }

    async fn close_producer(&self, id: ProducerId) {
        let mut state = self.state.write().await;
        if state.producers.remove(&id).is_none() {
            debug!(target: "engine.local", producer = %id, "close on already-closed producer");
            return;
        }
        // Consumers of a closed producer go with it.
        state.consumers.retain(|_, &mut (_, source)| source != id);
    }

    async fn close_transport(&self, id: TransportId) {
        let mut state = self.state.write().await;
        if state.transports.remove(&id).is_none() {
            debug!(target: "engine.local", transport = %id, "close on already-closed transport");
            return;
        }
        state.producers.retain(|_, &mut (parent, _)| parent != id);
        state.consumers.retain(|_, &mut (parent, _)| parent != id);
    }

    async fn close_router(&self, id: RouterId) {
        let mut state = self.state.write().await;
        if state.routers.remove(&id).is_none() {
            return;
        }
        let orphaned: Vec<TransportId> = state
            .transports
            .iter()
            .filter(|(_, &parent)| parent == id)
            .map(|(&t, _)| t)
            .collect();
        for transport in orphaned {
            state.transports.remove(&transport);
            state.producers.retain(|_, &mut (parent, _)| parent != transport);
            state.consumers.retain(|_, &mut (parent, _)| parent != transport);
        }
        debug!(target: "engine.local", router = %id, "router closed");
    }
}
