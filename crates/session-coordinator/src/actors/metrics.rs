//! Actor-system instrumentation.
//!
//! Every mailbox in the coordinator is a bounded mpsc channel, so the
//! interesting signal is saturation: how close a queue runs to its
//! capacity, and what gets dropped or evicted when it fills. Warnings
//! are latched once per saturation excursion rather than logged per
//! message. Everything is emitted under `sc.actor` tracing targets.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Mailbox utilization (percent of capacity) that latches a warning.
const SATURATION_WARN_PCT: usize = 80;

/// Utilization below which the warning latch re-arms.
const SATURATION_CLEAR_PCT: usize = 50;

/// Actor type for log labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// The room registry (singleton).
    Registry,
    /// One per live room.
    Room,
    /// One per WebSocket connection.
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }
}

/// Saturation tracking for one bounded mailbox.
///
/// The capacity is the actual mpsc buffer the actor was spawned with,
/// so utilization is meaningful rather than measured against an
/// arbitrary threshold.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    capacity: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    saturated: AtomicBool,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            capacity: capacity.max(1),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            saturated: AtomicBool::new(false),
        }
    }

    /// Record a message entering the mailbox.
    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);

        if depth * 100 >= self.capacity * SATURATION_WARN_PCT
            && !self.saturated.swap(true, Ordering::Relaxed)
        {
            warn!(
                target: "sc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = depth,
                capacity = self.capacity,
                "Mailbox approaching capacity"
            );
        }
    }

    /// Record a message leaving the mailbox (processed).
    pub fn record_dequeue(&self) {
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);

        if depth * 100 <= self.capacity * SATURATION_CLEAR_PCT {
            self.saturated.store(false, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.saturated.load(Ordering::Relaxed)
    }
}

/// Aggregated counters for the actor system, shared across tasks.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Rooms currently live.
    pub active_rooms: AtomicUsize,
    /// Connections currently open.
    pub active_connections: AtomicUsize,
    /// Actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Messages processed across all actors.
    pub total_messages_processed: AtomicU64,
    /// Outbound frames lost because a socket writer disappeared.
    pub frames_dropped: AtomicU64,
    /// Members evicted after their connection mailbox overflowed.
    pub dead_member_evictions: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_removed(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_created(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an actor panic observed by its supervisor.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "sc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound frame lost to a dead socket writer.
    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a member swept out of a room over a dead mailbox.
    pub fn record_eviction(&self) {
        self.dead_member_evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn eviction_count(&self) -> u64 {
        self.dead_member_evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_tracks_depth_and_peak() {
        let monitor = MailboxMonitor::new(ActorType::Room, "room-123", 100);

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_saturation_latch_arms_and_rearms() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-456", 10);

        for _ in 0..7 {
            monitor.record_enqueue();
        }
        assert!(!monitor.is_saturated());

        monitor.record_enqueue();
        assert!(monitor.is_saturated());

        // Stays latched until the queue drains back under half.
        monitor.record_dequeue();
        monitor.record_dequeue();
        assert!(monitor.is_saturated());
        monitor.record_dequeue();
        assert!(!monitor.is_saturated());
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();

        metrics.room_created();
        metrics.room_created();
        metrics.connection_created();
        assert_eq!(metrics.room_count(), 2);
        assert_eq!(metrics.connection_count(), 1);

        metrics.room_removed();
        metrics.connection_closed();
        assert_eq!(metrics.room_count(), 1);
        assert_eq!(metrics.connection_count(), 0);
    }

    #[test]
    fn test_drop_and_eviction_counters() {
        let metrics = ActorMetrics::new();

        metrics.record_dropped_frame();
        metrics.record_dropped_frame();
        metrics.record_eviction();
        assert_eq!(metrics.frames_dropped.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.eviction_count(), 1);
    }

    #[test]
    fn test_actor_metrics_panics() {
        let metrics = ActorMetrics::new();

        metrics.record_panic(ActorType::Room);
        metrics.record_panic(ActorType::Connection);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 2);
    }
}
