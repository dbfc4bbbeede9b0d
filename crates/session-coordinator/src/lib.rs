//! Session Coordinator Service Library
//!
//! This library provides the core functionality for the Session
//! Coordinator - a stateful WebSocket signaling server responsible for:
//!
//! - Meeting-room lifecycle and participant membership with roles
//! - Fan-out of presence and chat events to room members
//! - Addressed relay of WebRTC negotiation payloads (offer/answer/ICE)
//! - Bookkeeping of Media Routing Engine handles per participant
//!   (transport/producer/consumer) with ordered teardown
//!
//! # Architecture
//!
//! The coordinator uses an actor model hierarchy:
//!
//! ```text
//! RoomRegistryActor (singleton per process)
//! ├── owns the code -> room map
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns participants, chat transcript, resource ledger
//!         └── supervises N ConnectionActors
//!             └── ConnectionActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per room**: all mutating operations on a room are
//!   serialized through its mailbox; rooms never share a lock
//! - **Host is a normal participant**: `role = Host` in the participant
//!   set, with the host connection id kept only as a derived index
//! - **Per-connection bounded queues**: a slow client is dropped rather
//!   than allowed to stall the room's fan-out
//! - **No persistence**: live state is actor-owned memory; scheduled
//!   meeting metadata lives in an external Meeting Directory behind a
//!   trait
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`codes`] - Room code generation and validation
//! - [`config`] - Service configuration from environment
//! - [`directory`] - Meeting Directory collaborator contract
//! - [`errors`] - Error types with client-safe messages
//! - [`events`] - Typed wire protocol for the WebSocket surface
//! - [`media`] - Resource ledger over the Media Routing Engine
//! - [`server`] - HTTP routes and the WebSocket session loop

pub mod actors;
pub mod codes;
pub mod config;
pub mod directory;
pub mod errors;
pub mod events;
pub mod media;
pub mod observability;
pub mod server;
