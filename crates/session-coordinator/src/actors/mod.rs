//! Actor layer: registry, rooms, and connections.
//!
//! Each actor owns its state exclusively and communicates through
//! bounded mpsc mailboxes; there are no shared locks on the hot path.
//! The registry supervises room tasks, a room supervises the
//! connections joined to it, and cancellation flows parent to child
//! through [`tokio_util::sync::CancellationToken`] hierarchies.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::ConnectionHandle;
pub use registry::RegistryHandle;
pub use room::RoomHandle;
