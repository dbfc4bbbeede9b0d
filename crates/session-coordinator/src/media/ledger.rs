//! Per-room ledger of engine resources.
//!
//! The ledger is owned by a room actor and mutated only from inside
//! its message loop, so there is no locking here. It records which
//! engine handles belong to which connection and drives teardown in
//! reverse dependency order: consumers, then producers, then the
//! transport, then (at room end) the router. Every release path is
//! idempotent because the engine tolerates double closes.

use crate::actors::messages::ProducerAnnouncement;
use media_engine::{
    ConsumerId, EngineError, MediaKind, MediaRoutingEngine, ProducerId, RouterId, TransportId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Engine handles held on behalf of one connection.
#[derive(Debug, Default)]
struct ParticipantResources {
    transport: Option<TransportId>,
    producers: Vec<(MediaKind, ProducerId)>,
    consumers: Vec<ConsumerId>,
}

/// Tracks the engine resources of one room.
pub struct ResourceLedger {
    engine: Arc<dyn MediaRoutingEngine>,
    router: Option<RouterId>,
    participants: HashMap<Uuid, ParticipantResources>,
}

impl ResourceLedger {
    #[must_use]
    pub fn new(engine: Arc<dyn MediaRoutingEngine>) -> Self {
        Self {
            engine,
            router: None,
            participants: HashMap::new(),
        }
    }

    /// The room router, creating it on first use.
    pub async fn ensure_router(&mut self, room_id: Uuid) -> Result<RouterId, EngineError> {
        if let Some(router) = self.router {
            return Ok(router);
        }
        let router = self.engine.create_router(room_id).await?;
        self.router = Some(router);
        Ok(router)
    }

    /// The transport recorded for a connection, if any.
    #[must_use]
    pub fn transport_of(&self, connection_id: Uuid) -> Option<TransportId> {
        self.participants
            .get(&connection_id)
            .and_then(|r| r.transport)
    }

    /// The producer a connection holds for a media kind, if any.
    #[must_use]
    pub fn producer_of(&self, connection_id: Uuid, kind: MediaKind) -> Option<ProducerId> {
        self.participants.get(&connection_id).and_then(|r| {
            r.producers
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|&(_, id)| id)
        })
    }

    /// Whether a producer id is live in this room.
    #[must_use]
    pub fn producer_exists(&self, producer_id: ProducerId) -> bool {
        self.participants
            .values()
            .any(|r| r.producers.iter().any(|&(_, id)| id == producer_id))
    }

    /// Record a transport for a connection.
    pub fn record_transport(&mut self, connection_id: Uuid, transport: TransportId) {
        self.participants
            .entry(connection_id)
            .or_default()
            .transport = Some(transport);
    }

    /// Record a producer for a connection.
    pub fn record_producer(&mut self, connection_id: Uuid, kind: MediaKind, producer: ProducerId) {
        self.participants
            .entry(connection_id)
            .or_default()
            .producers
            .push((kind, producer));
    }

    /// Record a consumer for a connection.
    pub fn record_consumer(&mut self, connection_id: Uuid, consumer: ConsumerId) {
        self.participants
            .entry(connection_id)
            .or_default()
            .consumers
            .push(consumer);
    }

    /// Producers owned by everyone except the given connection, in the
    /// shape clients receive them.
    #[must_use]
    pub fn producers_visible_to(&self, connection_id: Uuid) -> Vec<ProducerAnnouncement> {
        let mut visible: Vec<ProducerAnnouncement> = self
            .participants
            .iter()
            .filter(|(&owner, _)| owner != connection_id)
            .flat_map(|(&owner, resources)| {
                resources
                    .producers
                    .iter()
                    .map(move |&(kind, producer_id)| ProducerAnnouncement {
                        connection_id: owner,
                        producer_id,
                        kind,
                    })
            })
            .collect();
        visible.sort_by_key(|a| a.producer_id.to_string());
        visible
    }

    /// Release everything a connection holds: consumers first, then
    /// producers, then the transport. Unknown connections are a no-op.
    pub async fn release_participant(&mut self, connection_id: Uuid) {
        let Some(resources) = self.participants.remove(&connection_id) else {
            return;
        };

        for consumer in resources.consumers {
            self.engine.close_consumer(consumer).await;
        }
        for (_, producer) in resources.producers {
            self.engine.close_producer(producer).await;
        }
        if let Some(transport) = resources.transport {
            self.engine.close_transport(transport).await;
        }

        debug!(
            target: "sc.media.ledger",
            connection_id = %connection_id,
            "Released participant media resources"
        );
    }

    /// Release every participant's resources and close the router.
    pub async fn release_room(&mut self) {
        let connection_ids: Vec<Uuid> = self.participants.keys().copied().collect();
        for connection_id in connection_ids {
            self.release_participant(connection_id).await;
        }
        if let Some(router) = self.router.take() {
            self.engine.close_router(router).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use media_engine::{EngineConfig, LocalEngine};
    use serde_json::json;

    async fn ledger_with_engine() -> (ResourceLedger, Arc<LocalEngine>) {
        let engine = Arc::new(LocalEngine::start(&EngineConfig::default()).unwrap());
        let ledger = ResourceLedger::new(engine.clone());
        (ledger, engine)
    }

    #[tokio::test]
    async fn test_ensure_router_is_created_once() {
        let (mut ledger, engine) = ledger_with_engine().await;
        let room_id = Uuid::new_v4();

        let first = ledger.ensure_router(room_id).await.unwrap();
        let second = ledger.ensure_router(room_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.live_handle_count().await, 1);
    }

    #[tokio::test]
    async fn test_release_participant_closes_in_dependency_order() {
        let (mut ledger, engine) = ledger_with_engine().await;
        let room_id = Uuid::new_v4();
        let host = Uuid::new_v4();

        let router = ledger.ensure_router(room_id).await.unwrap();
        let transport = engine.create_transport(router).await.unwrap();
        ledger.record_transport(host, transport.id);

        let producer = engine
            .produce(transport.id, MediaKind::Audio, json!({}))
            .await
            .unwrap();
        ledger.record_producer(host, MediaKind::Audio, producer);

        let consumer = engine
            .consume(transport.id, producer, json!({}))
            .await
            .unwrap();
        ledger.record_consumer(host, consumer.id);

        ledger.release_participant(host).await;

        // Only the router survives.
        assert_eq!(engine.live_handle_count().await, 1);
        assert!(ledger.transport_of(host).is_none());
        assert!(!ledger.producer_exists(producer));
    }

    #[tokio::test]
    async fn test_release_participant_is_idempotent() {
        let (mut ledger, _engine) = ledger_with_engine().await;
        let connection_id = Uuid::new_v4();

        ledger.release_participant(connection_id).await;
        ledger.release_participant(connection_id).await;
    }

    #[tokio::test]
    async fn test_release_room_closes_router() {
        let (mut ledger, engine) = ledger_with_engine().await;
        let room_id = Uuid::new_v4();
        let host = Uuid::new_v4();

        let router = ledger.ensure_router(room_id).await.unwrap();
        let transport = engine.create_transport(router).await.unwrap();
        ledger.record_transport(host, transport.id);

        ledger.release_room().await;
        assert_eq!(engine.live_handle_count().await, 0);
    }

    #[tokio::test]
    async fn test_producers_visible_to_excludes_own() {
        let (mut ledger, engine) = ledger_with_engine().await;
        let room_id = Uuid::new_v4();
        let host = Uuid::new_v4();
        let attendee = Uuid::new_v4();

        let router = ledger.ensure_router(room_id).await.unwrap();
        let transport = engine.create_transport(router).await.unwrap();
        ledger.record_transport(host, transport.id);

        let audio = engine
            .produce(transport.id, MediaKind::Audio, json!({}))
            .await
            .unwrap();
        let video = engine
            .produce(transport.id, MediaKind::Video, json!({}))
            .await
            .unwrap();
        ledger.record_producer(host, MediaKind::Audio, audio);
        ledger.record_producer(host, MediaKind::Video, video);

        assert_eq!(ledger.producers_visible_to(attendee).len(), 2);
        assert!(ledger.producers_visible_to(host).is_empty());

        ledger.release_participant(host).await;
        assert!(ledger.producers_visible_to(attendee).is_empty());
    }
}
