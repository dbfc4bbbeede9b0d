//! `RoomRegistryActor` - singleton actor that owns the code-to-room map.
//!
//! The registry allocates meeting codes, spawns room actors, hands out
//! room handles by code, and supervises room tasks: a finished room
//! task is evicted from the map (and a panicked one recorded). Codes
//! for scheduled meetings outlive their room task; resolving such a
//! code materializes a fresh room actor from the directory entry.

use super::messages::{
    CreateRoomRequest, RegistryMessage, RegistryStatus, RoomCreated,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomHandle};
use crate::codes;
use crate::config::Config;
use crate::directory::{MeetingDirectory, ScheduledMeeting};
use crate::errors::CoordinatorError;

use media_engine::MediaRoutingEngine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 500;

/// How often the registry sweeps for finished room tasks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Duration recorded for instant meetings with no schedule.
const DEFAULT_MEETING_DURATION_MINUTES: u32 = 60;

/// Handle to the `RoomRegistryActor`.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryHandle {
    /// Allocate a code and spawn a room.
    pub async fn create_room(
        &self,
        request: CreateRoomRequest,
    ) -> Result<RoomCreated, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::CreateRoom {
            request,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up a live room by code.
    pub async fn resolve(&self, code: String) -> Result<RoomHandle, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Resolve {
            code,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a finished room. Idempotent.
    pub async fn evict(&self, room_id: Uuid) -> Result<(), CoordinatorError> {
        self.send(RegistryMessage::Evict { room_id }).await
    }

    /// Registry counters.
    pub async fn status(&self) -> Result<RegistryStatus, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Status { respond_to: tx }).await?;
        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the registry and every room under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), CoordinatorError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }
}

/// A room under registry supervision.
struct ManagedRoom {
    handle: RoomHandle,
    task_handle: JoinHandle<()>,
}

/// The `RoomRegistryActor` implementation.
pub struct RegistryActor {
    config: Arc<Config>,
    engine: Arc<dyn MediaRoutingEngine>,
    directory: Arc<dyn MeetingDirectory>,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    /// Rooms by meeting code.
    rooms: HashMap<String, ManagedRoom>,
    rooms_created_total: u64,
    rooms_evicted_total: u64,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RegistryActor {
    /// Spawn the registry actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        config: Arc<Config>,
        engine: Arc<dyn MediaRoutingEngine>,
        directory: Arc<dyn MeetingDirectory>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);

        let actor = Self {
            config,
            engine,
            directory,
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            rooms_created_total: 0,
            rooms_evicted_total: 0,
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry", REGISTRY_CHANNEL_BUFFER),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RegistryHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    async fn run(mut self) {
        info!(target: "sc.actor.registry", "RoomRegistryActor started");

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = health_check.tick() => {
                    self.check_room_health().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sc.actor.registry",
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateRoom {
                request,
                respond_to,
            } => {
                let result = self.create_room(request).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Resolve { code, respond_to } => {
                let result = self.resolve(&code).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Evict { room_id } => {
                self.evict(room_id).await;
            }

            RegistryMessage::Status { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    active_rooms: self.rooms.len(),
                    rooms_created_total: self.rooms_created_total,
                    rooms_evicted_total: self.rooms_evicted_total,
                });
            }
        }
    }

    /// Allocate a code, register it in the directory, and spawn the
    /// room actor.
    async fn create_room(
        &mut self,
        request: CreateRoomRequest,
    ) -> Result<RoomCreated, CoordinatorError> {
        if !self.accepting_new {
            return Err(CoordinatorError::Conflict(
                "coordinator is shutting down".to_string(),
            ));
        }

        let mut allocated = None;
        for _ in 0..self.config.code_allocation_attempts {
            let candidate = codes::generate(&mut rand::thread_rng());
            if self.rooms.contains_key(&candidate) {
                continue;
            }
            if self.directory.lookup(&candidate).await.is_some() {
                continue;
            }
            allocated = Some(candidate);
            break;
        }
        let code = allocated.ok_or(CoordinatorError::AllocationExhausted)?;

        let scheduled = ScheduledMeeting {
            code: code.clone(),
            title: request.title,
            host_name: request.host_name,
            start_time: request.start_time.unwrap_or_else(chrono::Utc::now),
            duration_minutes: request
                .duration_minutes
                .unwrap_or(DEFAULT_MEETING_DURATION_MINUTES),
            is_active: false,
        };
        self.directory.register(scheduled.clone()).await;

        let room_id = Uuid::new_v4();
        let (handle, task_handle) = self.spawn_room(room_id, code.clone(), Some(scheduled));
        self.rooms.insert(code.clone(), ManagedRoom {
            handle,
            task_handle,
        });
        self.rooms_created_total += 1;

        info!(
            target: "sc.actor.registry",
            room_id = %room_id,
            code = %code,
            rooms = self.rooms.len(),
            "Room created"
        );

        Ok(RoomCreated { room_id, code })
    }

    /// Resolve a code to a live room handle, materializing a room
    /// from the directory if none is running.
    async fn resolve(&mut self, code: &str) -> Result<RoomHandle, CoordinatorError> {
        if !codes::is_valid(code) {
            return Err(CoordinatorError::RoomNotFound(code.to_string()));
        }

        if let Some(managed) = self.rooms.get(code) {
            if managed.task_handle.is_finished() {
                // Ended since the last sweep; evict and fall through.
                self.reap_room(code).await;
            } else {
                return Ok(managed.handle.clone());
            }
        }

        let Some(scheduled) = self.directory.lookup(code).await else {
            return Err(CoordinatorError::RoomNotFound(code.to_string()));
        };

        if !self.accepting_new {
            return Err(CoordinatorError::Conflict(
                "coordinator is shutting down".to_string(),
            ));
        }

        let room_id = Uuid::new_v4();
        let (handle, task_handle) =
            self.spawn_room(room_id, code.to_string(), Some(scheduled));
        self.rooms.insert(code.to_string(), ManagedRoom {
            handle: handle.clone(),
            task_handle,
        });
        self.rooms_created_total += 1;

        info!(
            target: "sc.actor.registry",
            room_id = %room_id,
            code = %code,
            "Room materialized from directory"
        );

        Ok(handle)
    }

    fn spawn_room(
        &self,
        room_id: Uuid,
        code: String,
        scheduled: Option<ScheduledMeeting>,
    ) -> (RoomHandle, JoinHandle<()>) {
        RoomActor::spawn(
            room_id,
            code,
            scheduled,
            self.config.clone(),
            self.engine.clone(),
            self.directory.clone(),
            self.cancel_token.child_token(),
            self.metrics.clone(),
        )
    }

    /// Remove a room whose task has finished. Live rooms are left
    /// alone; unknown ids are a no-op.
    async fn evict(&mut self, room_id: Uuid) {
        let Some(code) = self
            .rooms
            .iter()
            .find(|(_, managed)| managed.handle.room_id() == room_id)
            .map(|(code, _)| code.clone())
        else {
            return;
        };

        let finished = self
            .rooms
            .get(&code)
            .is_some_and(|managed| managed.task_handle.is_finished());
        if finished {
            self.reap_room(&code).await;
        } else {
            debug!(
                target: "sc.actor.registry",
                room_id = %room_id,
                "Evict requested for a live room, ignoring"
            );
        }
    }

    /// Sweep for room tasks that have finished and evict them.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(code, _)| code.clone())
            .collect();

        for code in finished {
            self.reap_room(&code).await;
        }
    }

    /// Remove one finished room and record whether it panicked.
    async fn reap_room(&mut self, code: &str) {
        let Some(managed) = self.rooms.remove(code) else {
            return;
        };
        self.rooms_evicted_total += 1;

        match managed.task_handle.await {
            Ok(()) => {
                info!(
                    target: "sc.actor.registry",
                    code = %code,
                    "Room actor exited cleanly, entry evicted"
                );
            }
            Err(join_error) => {
                if join_error.is_panic() {
                    error!(
                        target: "sc.actor.registry",
                        code = %code,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                    self.metrics.record_panic(ActorType::Room);
                    // A panicked room never reached its own teardown.
                    self.metrics.room_removed();
                }
            }
        }
    }

    /// Cancel every room and wait for their tasks to finish.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sc.actor.registry",
            rooms = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (code, managed) in self.rooms.drain() {
            match tokio::time::timeout(Duration::from_secs(30), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sc.actor.registry",
                        code = %code,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.registry",
                        code = %code,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.registry",
                        code = %code,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        info!(target: "sc.actor.registry", "Graceful shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use media_engine::{EngineConfig, LocalEngine};

    fn request() -> CreateRoomRequest {
        CreateRoomRequest {
            title: "Weekly sync".to_string(),
            host_name: "Alice".to_string(),
            start_time: None,
            duration_minutes: None,
        }
    }

    struct TestRegistry {
        handle: RegistryHandle,
        task: JoinHandle<()>,
        directory: Arc<InMemoryDirectory>,
    }

    fn spawn_registry() -> TestRegistry {
        let engine = Arc::new(LocalEngine::start(&EngineConfig::default()).unwrap());
        let directory = Arc::new(InMemoryDirectory::new());
        let (handle, task) = RegistryActor::spawn(
            Arc::new(Config::default()),
            engine,
            directory.clone(),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        TestRegistry {
            handle,
            task,
            directory,
        }
    }

    #[tokio::test]
    async fn test_create_room_allocates_valid_code() {
        let registry = spawn_registry();

        let created = registry.handle.create_room(request()).await.unwrap();
        assert!(codes::is_valid(&created.code));
        assert!(registry.directory.lookup(&created.code).await.is_some());

        let room = registry.handle.resolve(created.code.clone()).await.unwrap();
        assert_eq!(room.room_id(), created.room_id);

        registry.handle.cancel();
    }

    #[tokio::test]
    async fn test_resolve_unknown_code() {
        let registry = spawn_registry();

        let result = registry.handle.resolve("123456".to_string()).await;
        assert!(matches!(result, Err(CoordinatorError::RoomNotFound(_))));

        let result = registry.handle.resolve("not-a-code".to_string()).await;
        assert!(matches!(result, Err(CoordinatorError::RoomNotFound(_))));

        registry.handle.cancel();
    }

    #[tokio::test]
    async fn test_scheduled_room_rematerializes_after_task_exit() {
        let registry = spawn_registry();

        let created = registry.handle.create_room(request()).await.unwrap();
        let first = registry.handle.resolve(created.code.clone()).await.unwrap();

        // Kill the room task; the directory entry survives because the
        // meeting never went active.
        first.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = registry.handle.resolve(created.code.clone()).await.unwrap();
        assert_ne!(second.room_id(), first.room_id());
        assert_eq!(second.code(), created.code);

        registry.handle.cancel();
    }

    #[tokio::test]
    async fn test_status_counts_rooms() {
        let registry = spawn_registry();

        registry.handle.create_room(request()).await.unwrap();
        registry.handle.create_room(request()).await.unwrap();

        let status = registry.handle.status().await.unwrap();
        assert_eq!(status.active_rooms, 2);
        assert_eq!(status.rooms_created_total, 2);

        registry.handle.cancel();
    }

    #[tokio::test]
    async fn test_evict_ignores_live_and_unknown_rooms() {
        let registry = spawn_registry();
        let created = registry.handle.create_room(request()).await.unwrap();

        registry.handle.evict(created.room_id).await.unwrap();
        registry.handle.evict(Uuid::new_v4()).await.unwrap();

        let status = registry.handle.status().await.unwrap();
        assert_eq!(status.active_rooms, 1);

        registry.handle.cancel();
    }

    #[tokio::test]
    async fn test_cancellation_shuts_down_rooms() {
        let registry = spawn_registry();
        registry.handle.create_room(request()).await.unwrap();

        registry.handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), registry.task)
            .await
            .unwrap()
            .unwrap();
    }
}
