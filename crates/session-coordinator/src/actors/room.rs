//! `RoomActor` - per-room actor that owns all session state.
//!
//! Each `RoomActor` owns one room: membership and roles, the chat
//! transcript, the signaling relay, and the media resource ledger.
//! All mutation happens inside the message loop, so room state needs
//! no locks and every client observes membership changes in a single
//! total order.
//!
//! # Lifecycle
//!
//! A room starts `Forming`, becomes `Active` when the host arrives,
//! and is `Ended` by the host, by the host leaving (when configured),
//! or by sitting empty past the grace period. `Ended` is terminal:
//! the actor tears down its engine resources and exits, and the
//! registry evicts the entry when it notices the task finished.

use super::connection::ConnectionHandle;
use super::messages::{
    ChatEntry, ParticipantInfo, ProducerAnnouncement, Role, RoomMessage, RoomPhase,
    RoomStateSnapshot, SignalKind,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::config::{Config, MediaTopology};
use crate::directory::{MeetingDirectory, ScheduledMeeting};
use crate::errors::CoordinatorError;
use crate::events::ServerEvent;
use crate::media::ResourceLedger;

use media_engine::{MediaKind, MediaRoutingEngine, ProducerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How often the room checks its empty-grace deadline.
const GRACE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: Uuid,
    code: String,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Request admission for a connection.
    ///
    /// On success the `joined` snapshot has already been enqueued on
    /// the connection's mailbox, ahead of any later broadcast.
    pub async fn join(
        &self,
        connection_id: Uuid,
        display_name: String,
        wants_host: bool,
        handle: ConnectionHandle,
    ) -> Result<Role, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            connection_id,
            display_name,
            wants_host,
            handle,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a member. Idempotent.
    pub async fn leave(&self, connection_id: Uuid) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Leave { connection_id }).await
    }

    /// Post a chat message.
    ///
    /// Request methods take the sender's connection handle so the room
    /// can refuse a sender it no longer tracks as a member.
    pub async fn chat(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
        text: String,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Chat {
            sender,
            handle,
            text,
        })
        .await
    }

    /// Relay an addressed signaling payload.
    pub async fn signal(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
        target: Uuid,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Signal {
            sender,
            handle,
            target,
            kind,
            payload,
        })
        .await
    }

    /// Allocate a media transport for a member. The outcome arrives
    /// on the member's connection as an event.
    pub async fn create_transport(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::CreateTransport { sender, handle })
            .await
    }

    /// Complete the DTLS handshake for a member's transport.
    pub async fn connect_transport(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
        dtls_parameters: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::ConnectTransport {
            sender,
            handle,
            dtls_parameters,
        })
        .await
    }

    /// Start producing media. Host only.
    pub async fn produce(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Produce {
            sender,
            handle,
            kind,
            rtp_parameters,
        })
        .await
    }

    /// Consume a producer through a member's transport.
    pub async fn consume(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
        producer_id: ProducerId,
        rtp_capabilities: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::Consume {
            sender,
            handle,
            producer_id,
            rtp_capabilities,
        })
        .await
    }

    /// Fan out a host mute-state change.
    pub async fn toggle_media(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
        kind: MediaKind,
        muted: bool,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::ToggleMedia {
            sender,
            handle,
            kind,
            muted,
        })
        .await
    }

    /// End the meeting for everyone. Host only.
    pub async fn end_meeting(
        &self,
        sender: Uuid,
        handle: ConnectionHandle,
    ) -> Result<(), CoordinatorError> {
        self.send(RoomMessage::EndMeeting { sender, handle }).await
    }

    /// Point-in-time room state.
    pub async fn snapshot(&self) -> Result<RoomStateSnapshot, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Snapshot { respond_to: tx }).await?;
        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), CoordinatorError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }
}

/// One admitted member.
struct Member {
    display_name: String,
    role: Role,
    handle: ConnectionHandle,
}

impl Member {
    fn to_info(&self, connection_id: Uuid) -> ParticipantInfo {
        ParticipantInfo {
            connection_id,
            display_name: self.display_name.clone(),
            role: self.role,
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: Uuid,
    code: String,
    /// Directory metadata when the room was scheduled ahead of time.
    scheduled: Option<ScheduledMeeting>,
    phase: RoomPhase,
    members: HashMap<Uuid, Member>,
    chat_log: Vec<ChatEntry>,
    ledger: ResourceLedger,
    engine: Arc<dyn MediaRoutingEngine>,
    directory: Arc<dyn MeetingDirectory>,
    config: Arc<Config>,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    created_at: chrono::DateTime<chrono::Utc>,
    /// When the room last became (or started) empty.
    empty_since: Option<Instant>,
    /// Members whose mailbox overflowed or closed; swept after each
    /// message with the same path as an explicit leave.
    dead_members: Vec<Uuid>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: Uuid,
        code: String,
        scheduled: Option<ScheduledMeeting>,
        config: Arc<Config>,
        engine: Arc<dyn MediaRoutingEngine>,
        directory: Arc<dyn MeetingDirectory>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id,
            code: code.clone(),
            scheduled,
            phase: RoomPhase::Forming,
            members: HashMap::new(),
            chat_log: Vec::new(),
            ledger: ResourceLedger::new(engine.clone()),
            engine,
            directory,
            config,
            receiver,
            cancel_token: cancel_token.clone(),
            created_at: chrono::Utc::now(),
            empty_since: Some(Instant::now()),
            dead_members: Vec::new(),
            metrics: metrics.clone(),
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.to_string(), ROOM_CHANNEL_BUFFER),
        };

        metrics.room_created();
        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
            code,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.room", fields(room_id = %self.room_id, code = %self.code))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.room",
            room_id = %self.room_id,
            code = %self.code,
            "RoomActor started"
        );

        let mut grace_check = tokio::time::interval(GRACE_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.end_room("shutdown").await;
                    break;
                }

                _ = grace_check.tick() => {
                    self.check_empty_grace().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            self.sweep_dead_members().await;
                        }
                        None => {
                            info!(
                                target: "sc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.end_room("registry-dropped").await;
                            break;
                        }
                    }
                }
            }

            if self.phase == RoomPhase::Ended {
                break;
            }
        }

        self.metrics.room_removed();
        info!(
            target: "sc.actor.room",
            room_id = %self.room_id,
            code = %self.code,
            chat_messages = self.chat_log.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                connection_id,
                display_name,
                wants_host,
                handle,
                respond_to,
            } => {
                let result = self
                    .handle_join(connection_id, display_name, wants_host, handle)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave { connection_id } => {
                self.remove_member(connection_id, false).await;
            }

            RoomMessage::Chat {
                sender,
                handle,
                text,
            } => {
                let result = self.handle_chat(sender, text);
                self.reply_or_error(sender, &handle, result.map(|()| None));
            }

            RoomMessage::Signal {
                sender,
                handle,
                target,
                kind,
                payload,
            } => {
                let result = self.handle_signal(sender, target, kind, payload);
                self.reply_or_error(sender, &handle, result.map(|()| None));
            }

            RoomMessage::CreateTransport { sender, handle } => {
                let result = self.create_transport(sender).await;
                self.reply_or_error(sender, &handle, result.map(Some));
            }

            RoomMessage::ConnectTransport {
                sender,
                handle,
                dtls_parameters,
            } => {
                let result = self.connect_transport(sender, dtls_parameters).await;
                self.reply_or_error(sender, &handle, result.map(Some));
            }

            RoomMessage::Produce {
                sender,
                handle,
                kind,
                rtp_parameters,
            } => {
                match self.produce(sender, kind, rtp_parameters).await {
                    Ok((event, announcement)) => {
                        self.deliver_to(sender, event);
                        self.broadcast(
                            &ServerEvent::NewProducer {
                                connection_id: announcement.connection_id,
                                producer_id: announcement.producer_id,
                                kind: announcement.kind,
                            },
                            Some(sender),
                        );
                    }
                    Err(err) => self.reply_or_error(sender, &handle, Err(err)),
                }
            }

            RoomMessage::Consume {
                sender,
                handle,
                producer_id,
                rtp_capabilities,
            } => {
                let result = self.consume(sender, producer_id, rtp_capabilities).await;
                self.reply_or_error(sender, &handle, result.map(Some));
            }

            RoomMessage::ToggleMedia {
                sender,
                handle,
                kind,
                muted,
            } => {
                let result = self.toggle_media(sender, kind, muted);
                self.reply_or_error(sender, &handle, result.map(|()| None));
            }

            RoomMessage::EndMeeting { sender, handle } => {
                match self.require_host(sender) {
                    Ok(()) => self.end_room("host-request").await,
                    Err(err) => self.reply_or_error(sender, &handle, Err(err)),
                }
            }

            RoomMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    async fn handle_join(
        &mut self,
        connection_id: Uuid,
        display_name: String,
        wants_host: bool,
        handle: ConnectionHandle,
    ) -> Result<Role, CoordinatorError> {
        if self.phase == RoomPhase::Ended {
            return Err(CoordinatorError::RoomNotFound(self.code.clone()));
        }
        if self.members.contains_key(&connection_id) {
            return Err(CoordinatorError::Conflict(
                "connection already joined this meeting".to_string(),
            ));
        }
        if self.members.len() >= self.config.max_participants_per_room as usize {
            return Err(CoordinatorError::Conflict("meeting is full".to_string()));
        }

        // First claimant wins the host seat; later claimants are
        // silently demoted to attendee.
        let host_present = self.members.values().any(|m| m.role.is_host());
        let role = if wants_host && !host_present {
            Role::Host
        } else {
            Role::Attendee
        };

        // Attendees cannot enter a scheduled meeting before its start
        // time; the host can always open the room.
        if role == Role::Attendee && self.phase == RoomPhase::Forming {
            if let Some(scheduled) = &self.scheduled {
                if scheduled.start_time > chrono::Utc::now() {
                    return Err(CoordinatorError::NotYetStarted);
                }
            }
        }

        let participants: Vec<ParticipantInfo> = self
            .members
            .iter()
            .map(|(&id, member)| member.to_info(id))
            .collect();

        let joined = ServerEvent::Joined {
            code: self.code.clone(),
            room_id: self.room_id,
            connection_id,
            role,
            participants,
            chat_log: self.chat_log.clone(),
            producers: self.ledger.producers_visible_to(connection_id),
        };
        if !handle.try_deliver(joined) {
            return Err(CoordinatorError::Internal(
                "connection closed during join".to_string(),
            ));
        }

        self.members.insert(
            connection_id,
            Member {
                display_name: display_name.clone(),
                role,
                handle,
            },
        );
        self.empty_since = None;

        if role.is_host() && self.phase == RoomPhase::Forming {
            self.phase = RoomPhase::Active;
            self.directory.mark_active(&self.code).await;
        }

        self.broadcast(
            &ServerEvent::ParticipantJoined {
                connection_id,
                display_name: display_name.clone(),
                role,
            },
            Some(connection_id),
        );

        info!(
            target: "sc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            display_name = %display_name,
            role = ?role,
            participants = self.members.len(),
            "Participant joined"
        );

        Ok(role)
    }

    /// Remove a member and release their engine resources.
    ///
    /// Handles explicit leaves, socket closes, and dead-mailbox sweeps;
    /// unknown ids are a no-op, so all three paths can race safely.
    async fn remove_member(&mut self, connection_id: Uuid, cancel_connection: bool) {
        let Some(member) = self.members.remove(&connection_id) else {
            return;
        };

        self.ledger.release_participant(connection_id).await;
        if cancel_connection {
            member.handle.cancel();
        }

        info!(
            target: "sc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            role = ?member.role,
            participants = self.members.len(),
            "Participant left"
        );

        if member.role.is_host() {
            self.broadcast(&ServerEvent::HostLeft, None);
            if self.config.end_on_host_leave {
                self.end_room("host-left").await;
                return;
            }
        } else {
            self.broadcast(&ServerEvent::ParticipantLeft { connection_id }, None);
        }

        if self.members.is_empty() {
            self.empty_since = Some(Instant::now());
        }
    }

    fn handle_chat(&mut self, sender: Uuid, text: String) -> Result<(), CoordinatorError> {
        let member = self
            .members
            .get(&sender)
            .ok_or(CoordinatorError::NotAMember)?;

        let entry = ChatEntry {
            sender,
            sender_name: member.display_name.clone(),
            text,
            sent_at: chrono::Utc::now(),
        };
        self.chat_log.push(entry.clone());

        // The sender hears their own message back; transcript order is
        // the room's order, not the client's.
        self.broadcast(&ServerEvent::ChatMessage { entry }, None);
        Ok(())
    }

    fn handle_signal(
        &mut self,
        sender: Uuid,
        target: Uuid,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.require_member(sender)?;

        if !self.members.contains_key(&target) {
            return Err(CoordinatorError::InvalidTarget);
        }
        let event = kind.into_event(sender, payload);
        self.deliver_to(target, event);
        Ok(())
    }

    async fn create_transport(&mut self, sender: Uuid) -> Result<ServerEvent, CoordinatorError> {
        self.require_participant(sender)?;
        self.require_sfu()?;
        if self.ledger.transport_of(sender).is_some() {
            return Err(CoordinatorError::Conflict(
                "transport already created".to_string(),
            ));
        }

        let router = self.ledger.ensure_router(self.room_id).await?;
        let created = self.engine.create_transport(router).await?;
        self.ledger.record_transport(sender, created.id);

        Ok(ServerEvent::TransportCreated {
            id: created.id,
            negotiation: created.negotiation,
        })
    }

    async fn connect_transport(
        &mut self,
        sender: Uuid,
        dtls_parameters: serde_json::Value,
    ) -> Result<ServerEvent, CoordinatorError> {
        self.require_participant(sender)?;
        self.require_sfu()?;
        let transport = self
            .ledger
            .transport_of(sender)
            .ok_or_else(|| CoordinatorError::Conflict("no transport created".to_string()))?;

        self.engine.connect_transport(transport, dtls_parameters).await?;
        Ok(ServerEvent::TransportConnected)
    }

    async fn produce(
        &mut self,
        sender: Uuid,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
    ) -> Result<(ServerEvent, ProducerAnnouncement), CoordinatorError> {
        self.require_participant(sender)?;
        self.require_host(sender)?;
        self.require_sfu()?;
        let transport = self
            .ledger
            .transport_of(sender)
            .ok_or_else(|| CoordinatorError::Conflict("no transport created".to_string()))?;
        if self.ledger.producer_of(sender, kind).is_some() {
            return Err(CoordinatorError::Conflict(format!(
                "already producing {kind}"
            )));
        }

        let producer_id = self.engine.produce(transport, kind, rtp_parameters).await?;
        self.ledger.record_producer(sender, kind, producer_id);

        let announcement = ProducerAnnouncement {
            connection_id: sender,
            producer_id,
            kind,
        };
        Ok((
            ServerEvent::ProducerCreated { producer_id, kind },
            announcement,
        ))
    }

    async fn consume(
        &mut self,
        sender: Uuid,
        producer_id: ProducerId,
        rtp_capabilities: serde_json::Value,
    ) -> Result<ServerEvent, CoordinatorError> {
        self.require_participant(sender)?;
        self.require_sfu()?;
        let transport = self
            .ledger
            .transport_of(sender)
            .ok_or_else(|| CoordinatorError::Conflict("no transport created".to_string()))?;
        if !self.ledger.producer_exists(producer_id) {
            return Err(CoordinatorError::ProducerNotFound);
        }

        let created = self
            .engine
            .consume(transport, producer_id, rtp_capabilities)
            .await?;
        self.ledger.record_consumer(sender, created.id);

        Ok(ServerEvent::ConsumerCreated {
            id: created.id,
            producer_id: created.producer_id,
            kind: created.kind,
            params: created.params,
        })
    }

    fn toggle_media(
        &mut self,
        sender: Uuid,
        kind: MediaKind,
        muted: bool,
    ) -> Result<(), CoordinatorError> {
        self.require_host(sender)?;

        let event = match kind {
            MediaKind::Audio => ServerEvent::HostAudioToggled { muted },
            MediaKind::Video => ServerEvent::HostVideoToggled { muted },
        };
        self.broadcast(&event, Some(sender));
        Ok(())
    }

    /// End the room: notify everyone, release every engine handle, and
    /// retire the code. Idempotent.
    async fn end_room(&mut self, reason: &str) {
        if self.phase == RoomPhase::Ended {
            return;
        }
        let was_active = self.phase == RoomPhase::Active;
        self.phase = RoomPhase::Ended;

        self.broadcast(&ServerEvent::MeetingEnded, None);
        self.ledger.release_room().await;

        // A Forming room that expired unused keeps its directory entry
        // so the scheduled code can still materialize later.
        if was_active {
            self.directory.mark_ended(&self.code).await;
        }

        self.members.clear();
        self.dead_members.clear();

        info!(
            target: "sc.actor.room",
            room_id = %self.room_id,
            code = %self.code,
            reason = %reason,
            "Room ended"
        );
    }

    async fn check_empty_grace(&mut self) {
        if self.phase == RoomPhase::Ended || !self.members.is_empty() {
            return;
        }
        let Some(empty_since) = self.empty_since else {
            return;
        };
        if empty_since.elapsed() >= Duration::from_secs(self.config.empty_room_grace_seconds) {
            self.end_room("empty-grace-expired").await;
        }
    }

    /// Evict members whose connection mailbox overflowed or closed.
    async fn sweep_dead_members(&mut self) {
        while let Some(connection_id) = self.dead_members.pop() {
            warn!(
                target: "sc.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Evicting member with dead connection"
            );
            self.metrics.record_eviction();
            self.remove_member(connection_id, true).await;
        }
    }

    /// Fan out one event to every member except `except`.
    fn broadcast(&mut self, event: &ServerEvent, except: Option<Uuid>) {
        let mut dead = Vec::new();
        for (&id, member) in &self.members {
            if Some(id) == except {
                continue;
            }
            if !member.handle.try_deliver(event.clone()) {
                dead.push(id);
            }
        }
        self.dead_members.extend(dead);
    }

    /// Deliver one event to one member.
    fn deliver_to(&mut self, connection_id: Uuid, event: ServerEvent) {
        if let Some(member) = self.members.get(&connection_id) {
            if !member.handle.try_deliver(event) {
                self.dead_members.push(connection_id);
            }
        }
    }

    /// Deliver the success event (if the request produces one) or the
    /// error mapped for the client.
    fn reply_or_error(
        &mut self,
        sender: Uuid,
        handle: &ConnectionHandle,
        result: Result<Option<ServerEvent>, CoordinatorError>,
    ) {
        match result {
            Ok(Some(event)) => self.deliver_to(sender, event),
            Ok(None) => {}
            Err(err) => {
                debug!(
                    target: "sc.actor.room",
                    room_id = %self.room_id,
                    sender = %sender,
                    error = %err,
                    "Request failed"
                );
                let event = ServerEvent::error(&err);
                // A refused sender may not be in the member map; the
                // handle carried with the request still reaches them.
                if self.members.contains_key(&sender) {
                    self.deliver_to(sender, event);
                } else {
                    let _ = handle.try_deliver(event);
                }
            }
        }
    }

    fn require_member(&self, connection_id: Uuid) -> Result<(), CoordinatorError> {
        if self.members.contains_key(&connection_id) {
            Ok(())
        } else {
            Err(CoordinatorError::NotAMember)
        }
    }

    /// Membership check for ledger registrations. Absence means the
    /// would-be resource owner already left, so the engine handle must
    /// not be created at all.
    fn require_participant(&self, connection_id: Uuid) -> Result<(), CoordinatorError> {
        if self.members.contains_key(&connection_id) {
            Ok(())
        } else {
            Err(CoordinatorError::ParticipantNotFound)
        }
    }

    fn require_host(&self, connection_id: Uuid) -> Result<(), CoordinatorError> {
        let member = self
            .members
            .get(&connection_id)
            .ok_or(CoordinatorError::NotAMember)?;
        if member.role.is_host() {
            Ok(())
        } else {
            Err(CoordinatorError::Unauthorized(
                "only the host may perform this action".to_string(),
            ))
        }
    }

    fn require_sfu(&self) -> Result<(), CoordinatorError> {
        if self.config.media_topology == MediaTopology::Sfu {
            Ok(())
        } else {
            Err(CoordinatorError::Unsupported(
                "media engine operations require the sfu topology".to_string(),
            ))
        }
    }

    fn snapshot(&self) -> RoomStateSnapshot {
        RoomStateSnapshot {
            room_id: self.room_id,
            code: self.code.clone(),
            phase: self.phase,
            participant_count: self.members.len(),
            host_present: self.members.values().any(|m| m.role.is_host()),
            created_at: self.created_at,
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
    use crate::actors::connection::ConnectionActor;
    use crate::directory::InMemoryDirectory;
    use media_engine::{EngineConfig, LocalEngine};
    use serde_json::json;

    struct TestClient {
        connection_id: Uuid,
        handle: ConnectionHandle,
        rx: mpsc::Receiver<String>,
    }

    impl TestClient {
        fn new(metrics: &Arc<ActorMetrics>) -> Self {
            let (tx, rx) = mpsc::channel(64);
            let connection_id = Uuid::new_v4();
            let (handle, _task) = ConnectionActor::spawn(
                connection_id,
                tx,
                CancellationToken::new(),
                metrics.clone(),
            );
            Self {
                connection_id,
                handle,
                rx,
            }
        }

        async fn recv(&mut self) -> ServerEvent {
            let frame = tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("connection closed");
            serde_json::from_str(&frame).unwrap()
        }
    }

    struct TestRoom {
        handle: RoomHandle,
        task: JoinHandle<()>,
        engine: Arc<LocalEngine>,
        directory: Arc<InMemoryDirectory>,
        metrics: Arc<ActorMetrics>,
    }

    fn spawn_room_with(config: Config, scheduled: Option<ScheduledMeeting>) -> TestRoom {
        let engine = Arc::new(LocalEngine::start(&EngineConfig::default()).unwrap());
        let directory = Arc::new(InMemoryDirectory::new());
        let metrics = ActorMetrics::new();
        let (handle, task) = RoomActor::spawn(
            Uuid::new_v4(),
            "483920".to_string(),
            scheduled,
            Arc::new(config),
            engine.clone(),
            directory.clone(),
            CancellationToken::new(),
            metrics.clone(),
        );
        TestRoom {
            handle,
            task,
            engine,
            directory,
            metrics,
        }
    }

    fn spawn_room() -> TestRoom {
        spawn_room_with(Config::default(), None)
    }

    async fn join(room: &TestRoom, client: &TestClient, name: &str, wants_host: bool) -> Role {
        room.handle
            .join(
                client.connection_id,
                name.to_string(),
                wants_host,
                client.handle.clone(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_host_join_receives_snapshot_first() {
        let room = spawn_room();
        let metrics = room.metrics.clone();
        let mut host = TestClient::new(&metrics);

        let role = join(&room, &host, "Alice", true).await;
        assert_eq!(role, Role::Host);

        match host.recv().await {
            ServerEvent::Joined {
                role, participants, ..
            } => {
                assert_eq!(role, Role::Host);
                assert!(participants.is_empty());
            }
            other => panic!("expected joined, got {other:?}"),
        }

        let mut attendee = TestClient::new(&metrics);
        let role = join(&room, &attendee, "Bob", false).await;
        assert_eq!(role, Role::Attendee);

        match attendee.recv().await {
            ServerEvent::Joined { participants, .. } => {
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].display_name, "Alice");
            }
            other => panic!("expected joined, got {other:?}"),
        }

        match host.recv().await {
            ServerEvent::ParticipantJoined { display_name, .. } => {
                assert_eq!(display_name, "Bob");
            }
            other => panic!("expected participant-joined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_join_is_rejected() {
        let room = spawn_room();
        let client = TestClient::new(&room.metrics);

        join(&room, &client, "Alice", true).await;
        let result = room
            .handle
            .join(
                client.connection_id,
                "Alice".to_string(),
                true,
                client.handle.clone(),
            )
            .await;
        assert!(matches!(result, Err(CoordinatorError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_second_host_claim_is_demoted() {
        let room = spawn_room();
        let first = TestClient::new(&room.metrics);
        let second = TestClient::new(&room.metrics);

        assert_eq!(join(&room, &first, "Alice", true).await, Role::Host);
        assert_eq!(join(&room, &second, "Mallory", true).await, Role::Attendee);

        let snapshot = room.handle.snapshot().await.unwrap();
        assert!(snapshot.host_present);
        assert_eq!(snapshot.participant_count, 2);
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_and_is_replayed() {
        let room = spawn_room();
        let mut host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        host.recv().await; // joined
        host.recv().await; // participant-joined
        attendee.recv().await; // joined

        room.handle
            .chat(
                attendee.connection_id,
                attendee.handle.clone(),
                "hello".to_string(),
            )
            .await
            .unwrap();

        for client in [&mut host, &mut attendee] {
            match client.recv().await {
                ServerEvent::ChatMessage { entry } => {
                    assert_eq!(entry.text, "hello");
                    assert_eq!(entry.sender_name, "Bob");
                }
                other => panic!("expected chat-message, got {other:?}"),
            }
        }

        // A late joiner gets the transcript in the snapshot.
        let mut late = TestClient::new(&room.metrics);
        join(&room, &late, "Carol", false).await;
        match late.recv().await {
            ServerEvent::Joined { chat_log, .. } => {
                assert_eq!(chat_log.len(), 1);
                assert_eq!(chat_log[0].text, "hello");
            }
            other => panic!("expected joined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signal_reaches_only_target() {
        let room = spawn_room();
        let mut host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        host.recv().await;
        host.recv().await;
        attendee.recv().await;

        room.handle
            .signal(
                host.connection_id,
                host.handle.clone(),
                attendee.connection_id,
                SignalKind::Offer,
                json!({ "sdp": "v=0" }),
            )
            .await
            .unwrap();

        match attendee.recv().await {
            ServerEvent::Offer { sender, payload } => {
                assert_eq!(sender, host.connection_id);
                assert_eq!(payload["sdp"], "v=0");
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signal_to_departed_target_errors() {
        let room = spawn_room();
        let mut host = TestClient::new(&room.metrics);
        let attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        room.handle.leave(attendee.connection_id).await.unwrap();

        room.handle
            .signal(
                host.connection_id,
                host.handle.clone(),
                attendee.connection_id,
                SignalKind::IceCandidate,
                json!({}),
            )
            .await
            .unwrap();

        host.recv().await; // joined
        host.recv().await; // participant-joined
        host.recv().await; // participant-left
        match host.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "invalid-target"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_and_signal_from_outsider_are_refused() {
        let room = spawn_room();
        let host = TestClient::new(&room.metrics);
        join(&room, &host, "Alice", true).await;

        // Never joined; the room still answers through the carried
        // handle instead of dropping the request on the floor.
        let mut outsider = TestClient::new(&room.metrics);
        room.handle
            .chat(
                outsider.connection_id,
                outsider.handle.clone(),
                "hi".to_string(),
            )
            .await
            .unwrap();
        match outsider.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "not-a-member"),
            other => panic!("expected error, got {other:?}"),
        }

        room.handle
            .signal(
                outsider.connection_id,
                outsider.handle.clone(),
                host.connection_id,
                SignalKind::Offer,
                json!({ "sdp": "v=0" }),
            )
            .await
            .unwrap();
        match outsider.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "not-a-member"),
            other => panic!("expected error, got {other:?}"),
        }

        // The outsider was never admitted.
        let snapshot = room.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.participant_count, 1);
    }

    #[tokio::test]
    async fn test_transport_after_leave_is_refused_without_orphans() {
        let room = spawn_room();
        let host = TestClient::new(&room.metrics);
        let mut bob = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &bob, "Bob", false).await;
        room.handle.leave(bob.connection_id).await.unwrap();

        // A transport request racing a disconnect must not register an
        // engine handle for the departed owner.
        room.handle
            .create_transport(bob.connection_id, bob.handle.clone())
            .await
            .unwrap();

        bob.recv().await; // joined
        match bob.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "participant-not-found"),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(room.engine.live_handle_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let mut config = Config::default();
        config.end_on_host_leave = false;
        let room = spawn_room_with(config, None);
        let host = TestClient::new(&room.metrics);
        let attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;

        room.handle.leave(attendee.connection_id).await.unwrap();
        room.handle.leave(attendee.connection_id).await.unwrap();

        let snapshot = room.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.participant_count, 1);
    }

    #[tokio::test]
    async fn test_host_leave_ends_meeting() {
        let room = spawn_room();
        let host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        attendee.recv().await; // joined

        room.handle.leave(host.connection_id).await.unwrap();

        match attendee.recv().await {
            ServerEvent::HostLeft => {}
            other => panic!("expected host-left, got {other:?}"),
        }
        match attendee.recv().await {
            ServerEvent::MeetingEnded => {}
            other => panic!("expected meeting-ended, got {other:?}"),
        }

        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.engine.live_handle_count().await, 0);
    }

    #[tokio::test]
    async fn test_host_leave_without_end_policy_keeps_room() {
        let mut config = Config::default();
        config.end_on_host_leave = false;
        let room = spawn_room_with(config, None);
        let host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        attendee.recv().await;

        room.handle.leave(host.connection_id).await.unwrap();

        match attendee.recv().await {
            ServerEvent::HostLeft => {}
            other => panic!("expected host-left, got {other:?}"),
        }

        let snapshot = room.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, RoomPhase::Active);
        assert!(!snapshot.host_present);
    }

    #[tokio::test]
    async fn test_end_meeting_requires_host() {
        let room = spawn_room();
        let host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        attendee.recv().await;

        room.handle
            .end_meeting(attendee.connection_id, attendee.handle.clone())
            .await
            .unwrap();

        match attendee.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "unauthorized"),
            other => panic!("expected error, got {other:?}"),
        }

        let snapshot = room.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, RoomPhase::Active);
    }

    #[tokio::test]
    async fn test_media_flow_produce_then_consume() {
        let room = spawn_room();
        let mut host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        host.recv().await;
        host.recv().await;
        attendee.recv().await;

        room.handle
            .create_transport(host.connection_id, host.handle.clone())
            .await
            .unwrap();
        match host.recv().await {
            ServerEvent::TransportCreated { negotiation, .. } => {
                assert!(negotiation.get("dtlsParameters").is_some());
            }
            other => panic!("expected transport-created, got {other:?}"),
        }

        room.handle
            .connect_transport(
                host.connection_id,
                host.handle.clone(),
                json!({ "fingerprints": [] }),
            )
            .await
            .unwrap();
        assert!(matches!(
            host.recv().await,
            ServerEvent::TransportConnected
        ));

        room.handle
            .produce(
                host.connection_id,
                host.handle.clone(),
                MediaKind::Audio,
                json!({}),
            )
            .await
            .unwrap();
        let produced = match host.recv().await {
            ServerEvent::ProducerCreated { producer_id, kind } => {
                assert_eq!(kind, MediaKind::Audio);
                producer_id
            }
            other => panic!("expected producer-created, got {other:?}"),
        };

        // The attendee hears about the new producer and consumes it.
        match attendee.recv().await {
            ServerEvent::NewProducer {
                producer_id, kind, ..
            } => {
                assert_eq!(producer_id, produced);
                assert_eq!(kind, MediaKind::Audio);
            }
            other => panic!("expected new-producer, got {other:?}"),
        }

        room.handle
            .create_transport(attendee.connection_id, attendee.handle.clone())
            .await
            .unwrap();
        attendee.recv().await; // transport-created

        room.handle
            .consume(
                attendee.connection_id,
                attendee.handle.clone(),
                produced,
                json!({}),
            )
            .await
            .unwrap();
        match attendee.recv().await {
            ServerEvent::ConsumerCreated { producer_id, .. } => {
                assert_eq!(producer_id, produced);
            }
            other => panic!("expected consumer-created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_produce_requires_host() {
        let room = spawn_room();
        let host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        attendee.recv().await;

        room.handle
            .create_transport(attendee.connection_id, attendee.handle.clone())
            .await
            .unwrap();
        attendee.recv().await; // transport-created

        room.handle
            .produce(
                attendee.connection_id,
                attendee.handle.clone(),
                MediaKind::Video,
                json!({}),
            )
            .await
            .unwrap();
        match attendee.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "unauthorized"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_consume_unknown_producer_errors() {
        let room = spawn_room();
        let mut host = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        host.recv().await;

        room.handle
            .create_transport(host.connection_id, host.handle.clone())
            .await
            .unwrap();
        host.recv().await;

        room.handle
            .consume(
                host.connection_id,
                host.handle.clone(),
                ProducerId::new(),
                json!({}),
            )
            .await
            .unwrap();
        match host.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "producer-not-found"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mesh_topology_rejects_engine_ops() {
        let mut config = Config::default();
        config.media_topology = MediaTopology::Mesh;
        let room = spawn_room_with(config, None);
        let mut host = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        host.recv().await;

        room.handle
            .create_transport(host.connection_id, host.handle.clone())
            .await
            .unwrap();
        match host.recv().await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "unsupported"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_toggle_media_fans_out_to_attendees() {
        let room = spawn_room();
        let host = TestClient::new(&room.metrics);
        let mut attendee = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        join(&room, &attendee, "Bob", false).await;
        attendee.recv().await;

        room.handle
            .toggle_media(
                host.connection_id,
                host.handle.clone(),
                MediaKind::Audio,
                true,
            )
            .await
            .unwrap();

        match attendee.recv().await {
            ServerEvent::HostAudioToggled { muted } => assert!(muted),
            other => panic!("expected host-audio-toggled, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scheduled_meeting_gates_early_attendees() {
        let scheduled = ScheduledMeeting {
            code: "483920".to_string(),
            title: "Weekly sync".to_string(),
            host_name: "Alice".to_string(),
            start_time: chrono::Utc::now() + chrono::Duration::hours(1),
            duration_minutes: 30,
            is_active: false,
        };
        let room = spawn_room_with(Config::default(), Some(scheduled));
        let attendee = TestClient::new(&room.metrics);
        let host = TestClient::new(&room.metrics);

        let result = room
            .handle
            .join(
                attendee.connection_id,
                "Bob".to_string(),
                false,
                attendee.handle.clone(),
            )
            .await;
        assert!(matches!(result, Err(CoordinatorError::NotYetStarted)));

        // The host can open the room early, and attendees follow.
        assert_eq!(join(&room, &host, "Alice", true).await, Role::Host);
        assert_eq!(join(&room, &attendee, "Bob", false).await, Role::Attendee);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_expires_after_grace() {
        let room = spawn_room();

        // Nobody ever joins; the grace timer runs out and the actor
        // exits on its own.
        tokio::time::timeout(Duration::from_secs(120), room.task)
            .await
            .expect("room should end within the grace period")
            .unwrap();

        assert_eq!(room.metrics.room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vacated_room_expires_after_grace() {
        let mut config = Config::default();
        config.end_on_host_leave = false;
        let room = spawn_room_with(config, None);
        let host = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        room.handle.leave(host.connection_id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(120), room.task)
            .await
            .expect("room should end within the grace period")
            .unwrap();
        assert_eq!(room.engine.live_handle_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_after_end_is_rejected() {
        let room = spawn_room();
        let host = TestClient::new(&room.metrics);

        join(&room, &host, "Alice", true).await;
        room.handle
            .end_meeting(host.connection_id, host.handle.clone())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .unwrap()
            .unwrap();

        let late = TestClient::new(&room.metrics);
        let result = room
            .handle
            .join(
                late.connection_id,
                "Bob".to_string(),
                false,
                late.handle.clone(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_active_meeting_is_marked_in_directory() {
        let room = spawn_room();
        room.directory
            .register(ScheduledMeeting {
                code: "483920".to_string(),
                title: "Sync".to_string(),
                host_name: "Alice".to_string(),
                start_time: chrono::Utc::now(),
                duration_minutes: 30,
                is_active: false,
            })
            .await;

        let host = TestClient::new(&room.metrics);
        join(&room, &host, "Alice", true).await;
        assert!(room.directory.lookup("483920").await.unwrap().is_active);

        room.handle
            .end_meeting(host.connection_id, host.handle.clone())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), room.task)
            .await
            .unwrap()
            .unwrap();
        assert!(room.directory.lookup("483920").await.is_none());
    }
}
