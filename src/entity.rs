//! The entity contract
//!
//! Everything replicated between participants implements [`Entity`]:
//! identity, ownership, snapshot serialization and lifecycle. The
//! presentation layer is reached only through the narrow [`Agent`]
//! handle, and entity kinds are a closed enum dispatched through an
//! explicit [`Registry`] rather than any global table.

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::Pools;
use crate::wire::{SnapshotReader, SnapshotWriter, WireError};
use crate::OWNERSHIP_DEBOUNCE_SECS;

/// Closed set of replicated object kinds, with a 1-byte wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    /// A participant's avatar. Always simulated by its own account.
    Player = 0,
    /// Heavyweight spawned enemy.
    Enemy = 1,
    /// Boss-class enemy; at most one live per owner.
    BigEnemy = 2,
    /// Heavyweight spawned item.
    Item = 3,
    /// Throwable collectible whose controller migrates when caught.
    Plushie = 4,
    /// Network-visible projectile.
    EntityBullet = 5,
    /// Cosmetic-only projectile. Never granted a network identity;
    /// exists as a kind so admission can rate-limit announcements.
    CommonBullet = 6,
}

impl EntityKind {
    pub const COUNT: usize = 7;

    pub fn from_u8(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(EntityKind::Player),
            1 => Ok(EntityKind::Enemy),
            2 => Ok(EntityKind::BigEnemy),
            3 => Ok(EntityKind::Item),
            4 => Ok(EntityKind::Plushie),
            5 => Ok(EntityKind::EntityBullet),
            6 => Ok(EntityKind::CommonBullet),
            other => Err(WireError::UnknownEntityKind(other)),
        }
    }
}

/// A position/scale triple for the agent seam.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// The only touch-point between this core and the presentation layer: a
/// thin handle onto whatever world object an entity manipulates.
pub trait Agent {
    fn set_position(&mut self, position: Vec3);
    fn set_rotation(&mut self, yaw_degrees: f32);
    fn set_scale(&mut self, scale: Vec3);
    /// Attaches to another entity's world object, or detaches.
    fn set_parent(&mut self, parent: Option<u32>);
}

/// Agent that goes nowhere. Used headless (dedicated relays, tests).
#[derive(Debug, Default)]
pub struct NullAgent;

impl Agent for NullAgent {
    fn set_position(&mut self, _position: Vec3) {}
    fn set_rotation(&mut self, _yaw_degrees: f32) {}
    fn set_scale(&mut self, _scale: Vec3) {}
    fn set_parent(&mut self, _parent: Option<u32>) {}
}

/// Produces agents for entities materialized from the network. The
/// presentation layer supplies the real implementation; [`NullAgents`]
/// serves everything else.
pub trait AgentFactory {
    fn agent_for(&mut self, id: u32, kind: EntityKind) -> Box<dyn Agent>;
}

/// Factory handing out [`NullAgent`]s.
#[derive(Debug, Default)]
pub struct NullAgents;

impl AgentFactory for NullAgents {
    fn agent_for(&mut self, _id: u32, _kind: EntityKind) -> Box<dyn Agent> {
        Box::new(NullAgent)
    }
}

/// What to do with an entity whose owning participant left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Remove the entity with its owner.
    Remove,
    /// Keep it and hand authority to a surviving participant.
    Reassign,
}

/// The contract every replicated object satisfies.
///
/// `write` serializes authoritative state and is only called on the
/// owning participant; `read` applies a received snapshot. Both sides of
/// the pair must agree on layout per kind — the dispatch glue guarantees
/// a snapshot only ever reaches an entity of the kind that wrote it.
pub trait Entity {
    /// Globally unique identifier, immutable for the object's lifetime.
    fn id(&self) -> u32;

    fn kind(&self) -> EntityKind;

    /// Account id of the participant currently authoritative for this
    /// object.
    fn owner(&self) -> u32;

    /// Local clock time of the last applied snapshot.
    fn last_update(&self) -> f64;

    /// Hidden entities keep their id and store slot but are skipped by
    /// simulation and snapshot emission.
    fn hidden(&self) -> bool {
        false
    }

    fn set_hidden(&mut self, _hidden: bool) {}

    fn dead(&self) -> bool;

    /// Upper bound on the bytes one `write` emits. Used to preallocate
    /// the outbound buffer; must never be exceeded.
    fn buffer_size(&self) -> usize;

    /// Serializes current authoritative state. Must not mutate gameplay
    /// state.
    fn write(&self, sink: &mut SnapshotWriter) -> Result<(), WireError>;

    /// Applies a received snapshot. `now` is the local clock, used for
    /// `last_update` and the ownership debounce. On error the entity must
    /// be left in its prior state.
    fn read(&mut self, source: &mut SnapshotReader, now: f64) -> Result<(), WireError>;

    /// Materializes the world-side representation by binding its agent.
    fn create(&mut self, agent: Box<dyn Agent>);

    /// Per-tick local simulation step. Runs on every participant,
    /// owner or not.
    fn update(&mut self, dt: f32);

    /// Applies an incoming damage payload. No-op once dead.
    fn damage(&mut self, source: &mut SnapshotReader) -> Result<(), WireError>;

    /// Applies a death notification, with optional kind-specific death
    /// data. Idempotent: the second kill of an entity has no effect.
    fn kill(&mut self, source: Option<&mut SnapshotReader>) -> Result<(), WireError>;

    /// Whether this kind pins its id with a permanent tombstone after
    /// death, blocking recreation under the same identifier.
    fn leaves_tombstone(&self) -> bool {
        false
    }

    /// Disposition when the owning participant disconnects.
    fn orphan_policy(&self) -> OrphanPolicy {
        OrphanPolicy::Remove
    }

    /// Hands authority to another participant without the wire debounce,
    /// e.g. adopting an orphan. Non-ownable kinds ignore it.
    fn reassign_owner(&mut self, _new_owner: u32, _now: f64) {}

    /// Downcast seam: gameplay code drives the concrete type behind the
    /// store's trait objects (steering an avatar, launching a bullet).
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Owner identity plus the transfer debounce window, embedded by ownable
/// entity kinds. The owner is always the first field of an ownable
/// snapshot, written and read through this type.
///
/// Arbitration is last-writer-wins with a cooldown: once a transfer is
/// accepted, claims for a different owner inside the next
/// [`OWNERSHIP_DEBOUNCE_SECS`] are dropped silently. Creation counts as a
/// transfer, so a freshly spawned object cannot be grabbed instantly.
#[derive(Debug, Clone, Copy)]
pub struct Ownership {
    owner: u32,
    last_transfer: f64,
}

impl Ownership {
    pub fn new(owner: u32, now: f64) -> Self {
        Self {
            owner,
            last_transfer: now,
        }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Local clock time of the most recent accepted transfer.
    pub fn last_transfer(&self) -> f64 {
        self.last_transfer
    }

    /// Proposes a new owner. Returns true only when the proposal is
    /// accepted, which is when the caller fires its owner-changed hook.
    pub fn propose(&mut self, candidate: u32, now: f64) -> bool {
        if candidate == self.owner {
            return false;
        }
        if now - self.last_transfer < OWNERSHIP_DEBOUNCE_SECS {
            return false;
        }
        self.owner = candidate;
        self.last_transfer = now;
        true
    }

    /// Forces a transfer, bypassing the debounce. Local arbitration only
    /// (orphan adoption); never driven by the wire.
    pub fn force(&mut self, new_owner: u32, now: f64) {
        self.owner = new_owner;
        self.last_transfer = now;
    }

    /// Emits the owner as the leading snapshot field.
    pub fn write(&self, sink: &mut SnapshotWriter) {
        sink.write_u32(self.owner);
    }

    /// Consumes the leading proposed-owner field and arbitrates it.
    /// Returns whether ownership changed.
    pub fn read(&mut self, source: &mut SnapshotReader, now: f64) -> Result<bool, WireError> {
        let proposed = source.read_u32()?;
        Ok(self.propose(proposed, now))
    }
}

/// Constructor for one entity kind: `(id, owner, now) -> entity`.
pub type Supplier = fn(u32, u32, f64) -> Box<dyn Entity>;

/// Explicit supplier table over [`EntityKind`], passed by reference to
/// whoever mints entities. Populated once at startup.
#[derive(Default)]
pub struct Registry {
    suppliers: [Option<Supplier>; EntityKind::COUNT],
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EntityKind, supplier: Supplier) {
        self.suppliers[kind as usize] = Some(supplier);
    }

    pub fn knows(&self, kind: EntityKind) -> bool {
        self.suppliers[kind as usize].is_some()
    }

    /// Constructs an entity of `kind`, or `None` if the kind has no
    /// registered supplier (e.g. cosmetic-only kinds).
    pub fn spawn(&self, kind: EntityKind, id: u32, owner: u32, now: f64) -> Option<Box<dyn Entity>> {
        self.suppliers[kind as usize].map(|supplier| supplier(id, owner, now))
    }
}

/// Weak handle to an entity by identifier. Never owns the entity; every
/// access re-resolves against the store, so a handle held across a death
/// simply resolves to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    id: u32,
}

impl EntityRef {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn resolve<'a>(&self, pools: &'a Pools<Box<dyn Entity>>) -> Option<&'a dyn Entity> {
        pools.get(self.id).map(|boxed| boxed.as_ref())
    }

    pub fn resolve_mut<'a>(
        &self,
        pools: &'a mut Pools<Box<dyn Entity>>,
    ) -> Option<&'a mut Box<dyn Entity>> {
        pools.get_mut(self.id)
    }

    pub fn alive(&self, pools: &Pools<Box<dyn Entity>>) -> bool {
        pools.contains(self.id)
    }
}

/// Shared-test helper: an agent that records what was pushed to it, so
/// tests can observe the presentation seam without a world.
#[derive(Debug, Default, Clone)]
pub struct RecordingAgentState {
    pub position: Vec3,
    pub yaw: f32,
    pub scale: Vec3,
    pub parent: Option<u32>,
    pub updates: usize,
}

#[doc(hidden)]
pub struct RecordingAgent(pub std::rc::Rc<std::cell::RefCell<RecordingAgentState>>);

impl Agent for RecordingAgent {
    fn set_position(&mut self, position: Vec3) {
        let mut state = self.0.borrow_mut();
        state.position = position;
        state.updates += 1;
    }

    fn set_rotation(&mut self, yaw_degrees: f32) {
        self.0.borrow_mut().yaw = yaw_degrees;
    }

    fn set_scale(&mut self, scale: Vec3) {
        self.0.borrow_mut().scale = scale;
    }

    fn set_parent(&mut self, parent: Option<u32>) {
        self.0.borrow_mut().parent = parent;
    }
}

/// Map of participant account id -> player entity id, maintained by the
/// dispatch glue so gameplay code can find avatars without scanning.
pub type AvatarIndex = HashMap<u32, u32>;
