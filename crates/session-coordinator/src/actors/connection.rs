//! `ConnectionActor` - per-WebSocket connection actor.
//!
//! Each connection actor owns the outbound half of one client socket:
//! it receives [`ServerEvent`]s from room actors, serializes them, and
//! forwards the JSON frames to the socket writer task. Because the
//! mailbox is a FIFO and the `joined` snapshot is enqueued before any
//! subsequent broadcast, a client can never observe a broadcast that
//! predates its own snapshot.
//!
//! Delivery is non-blocking for the sender: a full mailbox means the
//! client is not draining its socket, and the room responds by
//! cancelling the connection rather than stalling the whole room.

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::events::ServerEvent;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: uuid::Uuid,
}

impl ConnectionHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> uuid::Uuid {
        self.connection_id
    }

    /// Enqueue one event for the client without blocking.
    ///
    /// Returns `false` if the mailbox is full or the actor is gone;
    /// the caller decides whether that means the connection is dead.
    pub fn try_deliver(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(ConnectionMessage::Deliver(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    target: "sc.actor.connection",
                    connection_id = %self.connection_id,
                    "Connection mailbox full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Flush pending events and close the socket.
    pub async fn close(&self) {
        let _ = self.sender.send(ConnectionMessage::Close).await;
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: uuid::Uuid,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Serialized frames headed for the socket writer task.
    outbound: mpsc::Sender<String>,
    /// Cancelled by the socket task or by the room that owns this member.
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: uuid::Uuid,
        outbound: mpsc::Sender<String>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            connection_id,
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics: metrics.clone(),
            mailbox: MailboxMonitor::new(
                ActorType::Connection,
                connection_id.to_string(),
                CONNECTION_CHANNEL_BUFFER,
            ),
        };

        metrics.connection_created();
        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "sc.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "sc.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sc.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "sc.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();
        info!(
            target: "sc.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver(event) => {
                self.forward(&event).await;
                false
            }

            ConnectionMessage::Close => {
                // Drain anything already enqueued ahead of the close.
                while let Ok(ConnectionMessage::Deliver(event)) = self.receiver.try_recv() {
                    self.forward(&event).await;
                }
                true
            }
        }
    }

    /// Serialize one event and hand it to the socket writer.
    async fn forward(&mut self, event: &ServerEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                error!(
                    target: "sc.actor.connection",
                    connection_id = %self.connection_id,
                    error = %err,
                    "Failed to serialize outbound event"
                );
                return;
            }
        };

        if self.outbound.send(frame).await.is_err() {
            // Writer task is gone; the socket is already closed.
            self.metrics.record_dropped_frame();
            self.cancel_token.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn spawn_actor(
        buffer: usize,
    ) -> (
        ConnectionHandle,
        JoinHandle<()>,
        mpsc::Receiver<String>,
        CancellationToken,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
        let cancel_token = CancellationToken::new();
        let (handle, task) = ConnectionActor::spawn(
            Uuid::new_v4(),
            outbound_tx,
            cancel_token.clone(),
            ActorMetrics::new(),
        );
        (handle, task, outbound_rx, cancel_token)
    }

    #[tokio::test]
    async fn test_deliver_forwards_serialized_event() {
        let (handle, _task, mut outbound_rx, _token) = spawn_actor(8);

        assert!(handle.try_deliver(ServerEvent::MeetingEnded));

        let frame = outbound_rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "meeting-ended");

        handle.cancel();
    }

    #[tokio::test]
    async fn test_close_drains_pending_events() {
        let (handle, task, mut outbound_rx, _token) = spawn_actor(8);

        assert!(handle.try_deliver(ServerEvent::HostLeft));
        assert!(handle.try_deliver(ServerEvent::MeetingEnded));
        handle.close().await;

        let first = outbound_rx.recv().await.unwrap();
        let second = outbound_rx.recv().await.unwrap();
        assert!(first.contains("host-left"));
        assert!(second.contains("meeting-ended"));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_actor() {
        let (handle, task, _outbound_rx, _token) = spawn_actor(8);

        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let (outbound_tx, _outbound_rx) = mpsc::channel(8);
        let (handle, task) = ConnectionActor::spawn(
            Uuid::new_v4(),
            outbound_tx,
            parent.child_token(),
            ActorMetrics::new(),
        );

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_cancelled());
    }
}
