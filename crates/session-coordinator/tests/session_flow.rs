//! End-to-end session flows through the registry and room actors.
//!
//! Each test drives the public actor API the way the WebSocket layer
//! does: a registry allocates a room, per-client connection actors
//! receive the serialized server events, and assertions read the
//! frames back off the outbound channel.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::Arc;
use std::time::Duration;

use media_engine::{EngineConfig, LocalEngine, MediaKind, ProducerId};
use serde_json::json;
use session_coordinator::actors::connection::ConnectionActor;
use session_coordinator::actors::messages::{CreateRoomRequest, Role, SignalKind};
use session_coordinator::actors::metrics::ActorMetrics;
use session_coordinator::actors::registry::RegistryActor;
use session_coordinator::actors::{ConnectionHandle, RegistryHandle, RoomHandle};
use session_coordinator::config::{Config, MediaTopology};
use session_coordinator::directory::InMemoryDirectory;
use session_coordinator::errors::CoordinatorError;
use session_coordinator::events::ServerEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// Fixtures
// ============================================================================

struct Coordinator {
    registry: RegistryHandle,
    engine: Arc<LocalEngine>,
    metrics: Arc<ActorMetrics>,
}

impl Coordinator {
    fn start(config: Config) -> Self {
        let engine = Arc::new(LocalEngine::start(&EngineConfig::default()).unwrap());
        let directory = Arc::new(InMemoryDirectory::new());
        let metrics = ActorMetrics::new();
        let (registry, _task) = RegistryActor::spawn(
            Arc::new(config),
            engine.clone(),
            directory,
            CancellationToken::new(),
            metrics.clone(),
        );
        Self {
            registry,
            engine,
            metrics,
        }
    }

    async fn create_room(&self, title: &str, host: &str) -> (RoomHandle, String) {
        let created = self
            .registry
            .create_room(CreateRoomRequest {
                title: title.to_string(),
                host_name: host.to_string(),
                start_time: None,
                duration_minutes: None,
            })
            .await
            .unwrap();
        let room = self.registry.resolve(created.code.clone()).await.unwrap();
        (room, created.code)
    }
}

struct Client {
    connection_id: Uuid,
    handle: ConnectionHandle,
    rx: mpsc::Receiver<String>,
}

impl Client {
    fn new(coordinator: &Coordinator) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let connection_id = Uuid::new_v4();
        let (handle, _task) = ConnectionActor::spawn(
            connection_id,
            tx,
            CancellationToken::new(),
            coordinator.metrics.clone(),
        );
        Self {
            connection_id,
            handle,
            rx,
        }
    }

    async fn join(&self, room: &RoomHandle, name: &str, wants_host: bool) -> Role {
        room.join(
            self.connection_id,
            name.to_string(),
            wants_host,
            self.handle.clone(),
        )
        .await
        .unwrap()
    }

    async fn recv(&mut self) -> ServerEvent {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed");
        serde_json::from_str(&frame).unwrap()
    }

    /// Skip events until one matches the predicate or the channel
    /// goes quiet.
    async fn recv_until<F>(&mut self, mut pred: F) -> ServerEvent
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        loop {
            let event = self.recv().await;
            if pred(&event) {
                return event;
            }
        }
    }
}

/// Poll until the registry no longer resolves the code.
async fn wait_until_gone(registry: &RegistryHandle, code: &str) {
    for _ in 0..100 {
        match registry.resolve(code.to_string()).await {
            Err(CoordinatorError::RoomNotFound(_)) => return,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("room {code} still resolvable");
}

// ============================================================================
// Membership, chat, and signaling
// ============================================================================

#[tokio::test]
async fn test_full_session_join_chat_relay_leave() {
    let coordinator = Coordinator::start(Config::default());
    let (room, code) = coordinator.create_room("Standup", "Alice").await;

    let mut host = Client::new(&coordinator);
    assert_eq!(host.join(&room, "Alice", true).await, Role::Host);
    match host.recv().await {
        ServerEvent::Joined {
            code: joined_code,
            role,
            participants,
            chat_log,
            ..
        } => {
            assert_eq!(joined_code, code);
            assert_eq!(role, Role::Host);
            assert!(participants.is_empty());
            assert!(chat_log.is_empty());
        }
        other => panic!("expected joined, got {other:?}"),
    }

    let mut bob = Client::new(&coordinator);
    assert_eq!(bob.join(&room, "Bob", false).await, Role::Attendee);
    match bob.recv().await {
        ServerEvent::Joined { participants, .. } => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].display_name, "Alice");
        }
        other => panic!("expected joined, got {other:?}"),
    }
    match host.recv().await {
        ServerEvent::ParticipantJoined {
            connection_id,
            display_name,
            role,
        } => {
            assert_eq!(connection_id, bob.connection_id);
            assert_eq!(display_name, "Bob");
            assert_eq!(role, Role::Attendee);
        }
        other => panic!("expected participant-joined, got {other:?}"),
    }

    // Chat reaches everyone, sender included, in order.
    room.chat(bob.connection_id, bob.handle.clone(), "hello".to_string())
        .await
        .unwrap();
    let bob_id = bob.connection_id;
    for client in [&mut host, &mut bob] {
        match client.recv().await {
            ServerEvent::ChatMessage { entry } => {
                assert_eq!(entry.sender, bob_id);
                assert_eq!(entry.sender_name, "Bob");
                assert_eq!(entry.text, "hello");
            }
            other => panic!("expected chat-message, got {other:?}"),
        }
    }

    // A late joiner replays the transcript in the join snapshot.
    let mut carol = Client::new(&coordinator);
    carol.join(&room, "Carol", false).await;
    match carol.recv().await {
        ServerEvent::Joined {
            participants,
            chat_log,
            ..
        } => {
            assert_eq!(participants.len(), 2);
            assert_eq!(chat_log.len(), 1);
            assert_eq!(chat_log[0].text, "hello");
        }
        other => panic!("expected joined, got {other:?}"),
    }

    // Addressed relay: only the target sees the offer.
    room.signal(
        host.connection_id,
        host.handle.clone(),
        bob.connection_id,
        SignalKind::Offer,
        json!({ "sdp": "v=0..." }),
    )
    .await
    .unwrap();
    let event = bob
        .recv_until(|e| matches!(e, ServerEvent::Offer { .. }))
        .await;
    match event {
        ServerEvent::Offer { sender, payload } => {
            assert_eq!(sender, host.connection_id);
            assert_eq!(payload["sdp"], "v=0...");
        }
        other => panic!("expected offer, got {other:?}"),
    }

    // Attendee departure is broadcast; the room stays up.
    room.leave(carol.connection_id).await.unwrap();
    let event = bob
        .recv_until(|e| matches!(e, ServerEvent::ParticipantLeft { .. }))
        .await;
    match event {
        ServerEvent::ParticipantLeft { connection_id } => {
            assert_eq!(connection_id, carol.connection_id);
        }
        other => panic!("expected participant-left, got {other:?}"),
    }
    let snapshot = room.snapshot().await.unwrap();
    assert_eq!(snapshot.participant_count, 2);
}

#[tokio::test]
async fn test_relay_to_departed_target_reports_error() {
    let coordinator = Coordinator::start(Config::default());
    let (room, _code) = coordinator.create_room("Standup", "Alice").await;

    let mut host = Client::new(&coordinator);
    host.join(&room, "Alice", true).await;
    host.recv().await;

    let bob = Client::new(&coordinator);
    bob.join(&room, "Bob", false).await;
    room.leave(bob.connection_id).await.unwrap();

    room.signal(
        host.connection_id,
        host.handle.clone(),
        bob.connection_id,
        SignalKind::IceCandidate,
        json!({ "candidate": "" }),
    )
    .await
    .unwrap();

    let event = host
        .recv_until(|e| matches!(e, ServerEvent::Error { .. }))
        .await;
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, "invalid-target"),
        other => panic!("expected error, got {other:?}"),
    }
}

// ============================================================================
// Host election
// ============================================================================

#[tokio::test]
async fn test_concurrent_host_claims_elect_exactly_one() {
    let coordinator = Coordinator::start(Config::default());
    let (room, _code) = coordinator.create_room("Standup", "Alice").await;

    let first = Client::new(&coordinator);
    let second = Client::new(&coordinator);

    // Both claim host at once; the room mailbox serializes them and
    // the loser is admitted as an attendee.
    let (a, b) = tokio::join!(
        room.join(
            first.connection_id,
            "Alice".to_string(),
            true,
            first.handle.clone(),
        ),
        room.join(
            second.connection_id,
            "Mallory".to_string(),
            true,
            second.handle.clone(),
        ),
    );
    let roles = [a.unwrap(), b.unwrap()];

    assert_eq!(roles.iter().filter(|r| r.is_host()).count(), 1);
    assert_eq!(roles.iter().filter(|r| !r.is_host()).count(), 1);

    let snapshot = room.snapshot().await.unwrap();
    assert!(snapshot.host_present);
    assert_eq!(snapshot.participant_count, 2);
}

// ============================================================================
// Media flow and ledger cleanup
// ============================================================================

#[tokio::test]
async fn test_media_flow_and_disconnect_releases_resources() {
    let coordinator = Coordinator::start(Config::default());
    let (room, _code) = coordinator.create_room("Broadcast", "Alice").await;

    let mut host = Client::new(&coordinator);
    host.join(&room, "Alice", true).await;
    host.recv().await;

    let mut bob = Client::new(&coordinator);
    bob.join(&room, "Bob", false).await;
    bob.recv().await;
    host.recv().await; // participant-joined

    // Host negotiates a transport and produces audio.
    room.create_transport(host.connection_id, host.handle.clone())
        .await
        .unwrap();
    match host.recv().await {
        ServerEvent::TransportCreated { .. } => {}
        other => panic!("expected transport-created, got {other:?}"),
    }
    room.connect_transport(
        host.connection_id,
        host.handle.clone(),
        json!({ "fingerprint": "aa:bb" }),
    )
    .await
    .unwrap();
    match host.recv().await {
        ServerEvent::TransportConnected => {}
        other => panic!("expected transport-connected, got {other:?}"),
    }
    room.produce(
        host.connection_id,
        host.handle.clone(),
        MediaKind::Audio,
        json!({ "codecs": [] }),
    )
    .await
    .unwrap();
    let producer_id = match host.recv().await {
        ServerEvent::ProducerCreated { producer_id, kind } => {
            assert_eq!(kind, MediaKind::Audio);
            producer_id
        }
        other => panic!("expected producer-created, got {other:?}"),
    };

    // The attendee is told about the new producer and consumes it.
    let announced: ProducerId = match bob.recv().await {
        ServerEvent::NewProducer {
            connection_id,
            producer_id,
            kind,
        } => {
            assert_eq!(connection_id, host.connection_id);
            assert_eq!(kind, MediaKind::Audio);
            producer_id
        }
        other => panic!("expected new-producer, got {other:?}"),
    };
    assert_eq!(announced, producer_id);

    room.create_transport(bob.connection_id, bob.handle.clone())
        .await
        .unwrap();
    bob.recv().await; // transport-created
    room.consume(
        bob.connection_id,
        bob.handle.clone(),
        announced,
        json!({ "codecs": [] }),
    )
    .await
    .unwrap();
    match bob.recv().await {
        ServerEvent::ConsumerCreated {
            producer_id: consumed,
            kind,
            ..
        } => {
            assert_eq!(consumed, producer_id);
            assert_eq!(kind, MediaKind::Audio);
        }
        other => panic!("expected consumer-created, got {other:?}"),
    }

    // A participant joining after production sees the producer in the
    // join snapshot.
    let mut carol = Client::new(&coordinator);
    carol.join(&room, "Carol", false).await;
    match carol.recv().await {
        ServerEvent::Joined { producers, .. } => {
            assert_eq!(producers.len(), 1);
            assert_eq!(producers[0].producer_id, producer_id);
        }
        other => panic!("expected joined, got {other:?}"),
    }

    // Router + 2 transports + 1 producer + 1 consumer.
    assert_eq!(coordinator.engine.live_handle_count().await, 5);

    // The consumer's departure releases its transport and consumer
    // but leaves the host's media intact.
    room.leave(bob.connection_id).await.unwrap();
    let snapshot = room.snapshot().await.unwrap();
    assert_eq!(snapshot.participant_count, 2);
    assert_eq!(coordinator.engine.live_handle_count().await, 3);
}

#[tokio::test]
async fn test_mesh_topology_rejects_engine_operations() {
    let config = Config {
        media_topology: MediaTopology::Mesh,
        ..Config::default()
    };
    let coordinator = Coordinator::start(config);
    let (room, _code) = coordinator.create_room("P2P", "Alice").await;

    let mut host = Client::new(&coordinator);
    host.join(&room, "Alice", true).await;
    host.recv().await;

    room.create_transport(host.connection_id, host.handle.clone())
        .await
        .unwrap();
    let event = host
        .recv_until(|e| matches!(e, ServerEvent::Error { .. }))
        .await;
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, "unsupported"),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(coordinator.engine.live_handle_count().await, 0);
}

// ============================================================================
// Meeting end
// ============================================================================

#[tokio::test]
async fn test_host_ending_meeting_tears_everything_down() {
    let coordinator = Coordinator::start(Config::default());
    let (room, code) = coordinator.create_room("Standup", "Alice").await;

    let mut host = Client::new(&coordinator);
    host.join(&room, "Alice", true).await;
    host.recv().await;

    let mut bob = Client::new(&coordinator);
    bob.join(&room, "Bob", false).await;
    bob.recv().await;
    host.recv().await;

    // Host holds media so teardown has something to release.
    room.create_transport(host.connection_id, host.handle.clone())
        .await
        .unwrap();
    host.recv().await;
    room.produce(
        host.connection_id,
        host.handle.clone(),
        MediaKind::Video,
        json!({}),
    )
    .await
    .unwrap();
    host.recv().await;
    bob.recv().await; // new-producer
    assert!(coordinator.engine.live_handle_count().await > 0);

    room.end_meeting(host.connection_id, host.handle.clone())
        .await
        .unwrap();
    let event = bob
        .recv_until(|e| matches!(e, ServerEvent::MeetingEnded))
        .await;
    assert!(matches!(event, ServerEvent::MeetingEnded));

    // The code is retired; the registry reaps the finished room task
    // and the directory no longer knows the meeting. Once the task is
    // gone, teardown has finished and every engine handle is closed.
    wait_until_gone(&coordinator.registry, &code).await;
    assert_eq!(coordinator.engine.live_handle_count().await, 0);
}

#[tokio::test]
async fn test_host_leave_ends_meeting_by_default() {
    let coordinator = Coordinator::start(Config::default());
    let (room, code) = coordinator.create_room("Standup", "Alice").await;

    let host = Client::new(&coordinator);
    host.join(&room, "Alice", true).await;

    let mut bob = Client::new(&coordinator);
    bob.join(&room, "Bob", false).await;

    room.leave(host.connection_id).await.unwrap();

    bob.recv_until(|e| matches!(e, ServerEvent::HostLeft)).await;
    bob.recv_until(|e| matches!(e, ServerEvent::MeetingEnded))
        .await;

    wait_until_gone(&coordinator.registry, &code).await;
}
