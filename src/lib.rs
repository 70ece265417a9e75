//! # Peerlink
//!
//! Entity-replication core for a peer-hosted multiplayer layer. There is
//! no central server: every participant simulates the objects it owns,
//! broadcasts fixed-cadence snapshots of them, and mirrors everyone
//! else's. This crate decides who owns what, mints collision-free object
//! identifiers without a coordinator, smooths snapshot streams for
//! display, and throttles how many objects any one participant may inject
//! into the shared simulation.
//!
//! ## Module Organization
//!
//! - [`lerp`] — snapshot-to-continuous interpolation (`FloatLerp`)
//! - [`wire`] — payload framing and bounds-checked snapshot cursors
//! - [`store`] — the id-keyed entity store (`Pools`) with its 4-way
//!   partitioned iteration
//! - [`allocator`] — deterministic, coordinator-free id assignment
//! - [`entity`] — the `Entity` contract, ownership debounce, kind
//!   registry and the presentation-layer `Agent` seam
//! - [`kinds`] — the built-in replicated entity kinds
//! - [`admission`] — per-owner quotas, eviction and the ban list
//! - [`dispatch`] — `Networking`, routing inbound payloads and emitting
//!   outbound snapshots
//!
//! ## Concurrency Model
//!
//! Everything here is single-threaded and tick-driven. The transport
//! layer (out of scope) dequeues datagrams and hands them to
//! [`dispatch::Networking::handle_payload`] synchronously within a tick;
//! outbound snapshots are returned as buffers for the transport to send.
//! No component spawns threads, blocks, or locks.

pub mod admission;
pub mod allocator;
pub mod dispatch;
pub mod entity;
pub mod kinds;
pub mod lerp;
pub mod store;
pub mod wire;

/// Simulation ticks per second (the owner's authoritative step rate).
pub const TICK_RATE_HZ: f32 = 60.0;

/// Snapshot emissions per second; slower than the simulation tick.
pub const SNAPSHOT_RATE_HZ: f32 = 12.0;

/// Maximum simultaneous participants in one session.
pub const MAX_PARTICIPANTS: usize = 8;

/// Seconds that must elapse between accepted ownership transfers of the
/// same entity.
pub const OWNERSHIP_DEBOUNCE_SECS: f64 = 1.0;

pub use admission::{Administration, Admission, QuotaClass};
pub use allocator::IdAllocator;
pub use dispatch::{Networking, Outbound, Target};
pub use entity::{
    Agent, AgentFactory, Entity, EntityKind, EntityRef, NullAgent, NullAgents, OrphanPolicy,
    Ownership, Registry, Vec3,
};
pub use lerp::FloatLerp;
pub use store::Pools;
pub use wire::{PacketKind, SnapshotReader, SnapshotWriter, WireError};
