//! Built-in replicated entity kinds
//!
//! Gameplay-specific behavior lives outside this crate; these are the
//! minimal concrete kinds the replication layer itself ships, each one a
//! straight implementation of the [`Entity`] contract. They double as the
//! reference for how an external kind is expected to serialize: fixed
//! header fields through the cursor, then one serde state struct.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::entity::{Agent, Entity, EntityKind, OrphanPolicy, Ownership, Vec3};
use crate::lerp::FloatLerp;
use crate::wire::{SnapshotReader, SnapshotWriter, WireError};
use crate::SNAPSHOT_RATE_HZ;

/// Interpolated transform every kind shares: position plus facing,
/// smoothed between snapshots on remote replicas.
#[derive(Debug)]
struct SmoothedTransform {
    x: FloatLerp,
    y: FloatLerp,
    z: FloatLerp,
    yaw: FloatLerp,
    /// Seconds since the last applied snapshot, the sample point for the
    /// interpolators.
    elapsed: f32,
}

impl SmoothedTransform {
    fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            x: FloatLerp::with_initial(position.x, SNAPSHOT_RATE_HZ),
            y: FloatLerp::with_initial(position.y, SNAPSHOT_RATE_HZ),
            z: FloatLerp::with_initial(position.z, SNAPSHOT_RATE_HZ),
            yaw: FloatLerp::with_initial(yaw, SNAPSHOT_RATE_HZ),
            elapsed: 0.0,
        }
    }

    fn push(&mut self, position: Vec3, yaw: f32) {
        self.x.set(position.x);
        self.y.set(position.y);
        self.z.set(position.z);
        self.yaw.set(yaw);
        self.elapsed = 0.0;
    }

    fn snap(&mut self, position: Vec3, yaw: f32) {
        self.x.reset(position.x);
        self.y.reset(position.y);
        self.z.reset(position.z);
        self.yaw.reset(yaw);
        self.elapsed = 0.0;
    }

    fn advance(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    fn position(&self) -> Vec3 {
        Vec3::new(
            self.x.get(self.elapsed),
            self.y.get(self.elapsed),
            self.z.get(self.elapsed),
        )
    }

    fn yaw(&self) -> f32 {
        self.yaw.get_angle(self.elapsed)
    }

    fn apply_to(&self, agent: &mut dyn Agent) {
        agent.set_position(self.position());
        agent.set_rotation(self.yaw());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AvatarState {
    position: Vec3,
    yaw: f32,
    health: f32,
}

/// A participant's avatar. Owned by its account for its whole lifetime;
/// every participant writes its own and mirrors everyone else's.
pub struct Avatar {
    id: u32,
    owner: u32,
    state: AvatarState,
    transform: SmoothedTransform,
    agent: Option<Box<dyn Agent>>,
    last_update: f64,
    hidden: bool,
    dead: bool,
}

impl Avatar {
    pub fn new(id: u32, owner: u32, now: f64) -> Self {
        let state = AvatarState {
            position: Vec3::default(),
            yaw: 0.0,
            health: 100.0,
        };
        Self {
            id,
            owner,
            transform: SmoothedTransform::new(state.position, state.yaw),
            state,
            agent: None,
            last_update: now,
            hidden: false,
            dead: false,
        }
    }

    pub fn supply(id: u32, owner: u32, now: f64) -> Box<dyn Entity> {
        Box::new(Self::new(id, owner, now))
    }

    /// Owner-side steering: gameplay moves the avatar between snapshots.
    pub fn set_transform(&mut self, position: Vec3, yaw: f32) {
        self.state.position = position;
        self.state.yaw = yaw;
        self.transform.snap(position, yaw);
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position()
    }

    pub fn health(&self) -> f32 {
        self.state.health
    }
}

impl Entity for Avatar {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Player
    }

    fn owner(&self) -> u32 {
        self.owner
    }

    fn last_update(&self) -> f64 {
        self.last_update
    }

    fn hidden(&self) -> bool {
        self.hidden
    }

    fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    fn dead(&self) -> bool {
        self.dead
    }

    fn buffer_size(&self) -> usize {
        64
    }

    fn write(&self, sink: &mut SnapshotWriter) -> Result<(), WireError> {
        sink.write_payload(&self.state)
    }

    fn read(&mut self, source: &mut SnapshotReader, now: f64) -> Result<(), WireError> {
        let state: AvatarState = source.read_payload()?;
        self.transform.push(state.position, state.yaw);
        self.state = state;
        self.last_update = now;
        Ok(())
    }

    fn create(&mut self, mut agent: Box<dyn Agent>) {
        self.transform.apply_to(agent.as_mut());
        self.agent = Some(agent);
    }

    fn update(&mut self, dt: f32) {
        self.transform.advance(dt);
        if let Some(agent) = self.agent.as_mut() {
            agent.set_position(self.transform.position());
            agent.set_rotation(self.transform.yaw());
        }
    }

    fn damage(&mut self, source: &mut SnapshotReader) -> Result<(), WireError> {
        let amount = source.read_f32()?;
        if self.dead {
            return Ok(());
        }
        self.state.health -= amount;
        Ok(())
    }

    fn kill(&mut self, _source: Option<&mut SnapshotReader>) -> Result<(), WireError> {
        if !self.dead {
            self.dead = true;
            self.state.health = 0.0;
        }
        Ok(())
    }

    // An avatar vanishes with its participant.
    fn orphan_policy(&self) -> OrphanPolicy {
        OrphanPolicy::Remove
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MobState {
    position: Vec3,
    yaw: f32,
    health: f32,
}

/// Heavyweight spawned object: enemies, bosses and world items. The
/// spawning participant owns and simulates it; everyone else mirrors.
pub struct Mob {
    id: u32,
    kind: EntityKind,
    owner: u32,
    state: MobState,
    transform: SmoothedTransform,
    agent: Option<Box<dyn Agent>>,
    last_update: f64,
    hidden: bool,
    dead: bool,
    death_effects: usize,
}

impl Mob {
    pub fn new(id: u32, kind: EntityKind, owner: u32, now: f64) -> Self {
        debug_assert!(matches!(
            kind,
            EntityKind::Enemy | EntityKind::BigEnemy | EntityKind::Item
        ));
        let state = MobState {
            position: Vec3::default(),
            yaw: 0.0,
            health: 100.0,
        };
        Self {
            id,
            kind,
            owner,
            transform: SmoothedTransform::new(state.position, state.yaw),
            state,
            agent: None,
            last_update: now,
            hidden: false,
            dead: false,
            death_effects: 0,
        }
    }

    pub fn supply_enemy(id: u32, owner: u32, now: f64) -> Box<dyn Entity> {
        Box::new(Self::new(id, EntityKind::Enemy, owner, now))
    }

    pub fn supply_big_enemy(id: u32, owner: u32, now: f64) -> Box<dyn Entity> {
        Box::new(Self::new(id, EntityKind::BigEnemy, owner, now))
    }

    pub fn supply_item(id: u32, owner: u32, now: f64) -> Box<dyn Entity> {
        Box::new(Self::new(id, EntityKind::Item, owner, now))
    }

    pub fn set_transform(&mut self, position: Vec3, yaw: f32) {
        self.state.position = position;
        self.state.yaw = yaw;
        self.transform.snap(position, yaw);
    }

    pub fn health(&self) -> f32 {
        self.state.health
    }

    /// How many times the death burst has run. At most once by contract.
    pub fn death_effects(&self) -> usize {
        self.death_effects
    }
}

impl Entity for Mob {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn owner(&self) -> u32 {
        self.owner
    }

    fn last_update(&self) -> f64 {
        self.last_update
    }

    fn hidden(&self) -> bool {
        self.hidden
    }

    fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    fn dead(&self) -> bool {
        self.dead
    }

    fn buffer_size(&self) -> usize {
        64
    }

    fn write(&self, sink: &mut SnapshotWriter) -> Result<(), WireError> {
        sink.write_payload(&self.state)
    }

    fn read(&mut self, source: &mut SnapshotReader, now: f64) -> Result<(), WireError> {
        let state: MobState = source.read_payload()?;
        self.transform.push(state.position, state.yaw);
        self.state = state;
        self.last_update = now;
        Ok(())
    }

    fn create(&mut self, mut agent: Box<dyn Agent>) {
        self.transform.apply_to(agent.as_mut());
        self.agent = Some(agent);
    }

    fn update(&mut self, dt: f32) {
        if self.dead {
            return;
        }
        self.transform.advance(dt);
        if let Some(agent) = self.agent.as_mut() {
            agent.set_position(self.transform.position());
            agent.set_rotation(self.transform.yaw());
        }
    }

    fn damage(&mut self, source: &mut SnapshotReader) -> Result<(), WireError> {
        let amount = source.read_f32()?;
        if self.dead {
            return Ok(());
        }
        self.state.health -= amount;
        if self.state.health <= 0.0 {
            self.kill(None)?;
        }
        Ok(())
    }

    fn kill(&mut self, _source: Option<&mut SnapshotReader>) -> Result<(), WireError> {
        if self.dead {
            return Ok(());
        }
        self.dead = true;
        self.state.health = 0.0;
        self.death_effects += 1;
        Ok(())
    }

    // Bosses keep their id pinned so a straggling snapshot cannot respawn
    // a defeated one.
    fn leaves_tombstone(&self) -> bool {
        self.kind == EntityKind::BigEnemy
    }

    fn orphan_policy(&self) -> OrphanPolicy {
        OrphanPolicy::Remove
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlushieState {
    position: Vec3,
    yaw: f32,
}

/// Throwable collectible whose controller migrates between participants:
/// whoever catches it claims ownership, arbitrated by the debounce
/// window. The owner field leads every snapshot.
pub struct Plushie {
    id: u32,
    ownership: Ownership,
    state: PlushieState,
    transform: SmoothedTransform,
    agent: Option<Box<dyn Agent>>,
    last_update: f64,
    hidden: bool,
    dead: bool,
    owner_changes: usize,
}

impl Plushie {
    pub fn new(id: u32, owner: u32, now: f64) -> Self {
        let state = PlushieState {
            position: Vec3::default(),
            yaw: 0.0,
        };
        Self {
            id,
            ownership: Ownership::new(owner, now),
            transform: SmoothedTransform::new(state.position, state.yaw),
            state,
            agent: None,
            last_update: now,
            hidden: false,
            dead: false,
            owner_changes: 0,
        }
    }

    pub fn supply(id: u32, owner: u32, now: f64) -> Box<dyn Entity> {
        Box::new(Self::new(id, owner, now))
    }

    pub fn set_transform(&mut self, position: Vec3, yaw: f32) {
        self.state.position = position;
        self.state.yaw = yaw;
        self.transform.snap(position, yaw);
    }

    /// Local claim (the catching hand), subject to the same debounce as a
    /// claim off the wire.
    pub fn claim(&mut self, new_owner: u32, now: f64) -> bool {
        let accepted = self.ownership.propose(new_owner, now);
        if accepted {
            self.on_owner_changed();
        }
        accepted
    }

    /// Accepted transfers since creation.
    pub fn owner_changes(&self) -> usize {
        self.owner_changes
    }

    fn on_owner_changed(&mut self) {
        self.owner_changes += 1;
        // A handoff teleports authority; blending across it would drag
        // the plushie through the air between the two holders.
        self.transform.snap(self.state.position, self.state.yaw);
    }
}

impl Entity for Plushie {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Plushie
    }

    fn owner(&self) -> u32 {
        self.ownership.owner()
    }

    fn last_update(&self) -> f64 {
        self.last_update
    }

    fn hidden(&self) -> bool {
        self.hidden
    }

    fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    fn dead(&self) -> bool {
        self.dead
    }

    fn buffer_size(&self) -> usize {
        48
    }

    fn write(&self, sink: &mut SnapshotWriter) -> Result<(), WireError> {
        self.ownership.write(sink);
        sink.write_payload(&self.state)
    }

    fn read(&mut self, source: &mut SnapshotReader, now: f64) -> Result<(), WireError> {
        // Parse everything before mutating, so a truncated snapshot
        // cannot leave a half-applied transfer behind.
        let proposed = source.read_u32()?;
        let state: PlushieState = source.read_payload()?;

        if self.ownership.propose(proposed, now) {
            self.on_owner_changed();
        }
        self.transform.push(state.position, state.yaw);
        self.state = state;
        self.last_update = now;
        Ok(())
    }

    fn create(&mut self, mut agent: Box<dyn Agent>) {
        self.transform.apply_to(agent.as_mut());
        self.agent = Some(agent);
    }

    fn update(&mut self, dt: f32) {
        self.transform.advance(dt);
        if let Some(agent) = self.agent.as_mut() {
            agent.set_position(self.transform.position());
            agent.set_rotation(self.transform.yaw());
        }
    }

    fn damage(&mut self, source: &mut SnapshotReader) -> Result<(), WireError> {
        // Plushies are indestructible by damage; consume the payload so
        // trailing fields stay aligned for any caller that keeps reading.
        let _ = source.read_f32()?;
        Ok(())
    }

    fn kill(&mut self, _source: Option<&mut SnapshotReader>) -> Result<(), WireError> {
        self.dead = true;
        Ok(())
    }

    // A dropped plushie outlives its thrower.
    fn orphan_policy(&self) -> OrphanPolicy {
        OrphanPolicy::Reassign
    }

    fn reassign_owner(&mut self, new_owner: u32, now: f64) {
        self.ownership.force(new_owner, now);
        self.on_owner_changed();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BulletState {
    position: Vec3,
    velocity: Vec3,
}

/// Network-visible projectile. Flies ballistically on every participant
/// and expires by TTL; distinct from cosmetic common bullets, which never
/// get a network identity at all.
pub struct Bullet {
    id: u32,
    owner: u32,
    state: BulletState,
    agent: Option<Box<dyn Agent>>,
    last_update: f64,
    hidden: bool,
    ttl: f32,
}

impl Bullet {
    pub const TTL_SECS: f32 = 3.0;

    pub fn new(id: u32, owner: u32, now: f64) -> Self {
        Self {
            id,
            owner,
            state: BulletState {
                position: Vec3::default(),
                velocity: Vec3::default(),
            },
            agent: None,
            last_update: now,
            hidden: false,
            ttl: Self::TTL_SECS,
        }
    }

    pub fn supply(id: u32, owner: u32, now: f64) -> Box<dyn Entity> {
        Box::new(Self::new(id, owner, now))
    }

    pub fn launch(&mut self, position: Vec3, velocity: Vec3) {
        self.state.position = position;
        self.state.velocity = velocity;
    }

    pub fn position(&self) -> Vec3 {
        self.state.position
    }
}

impl Entity for Bullet {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::EntityBullet
    }

    fn owner(&self) -> u32 {
        self.owner
    }

    fn last_update(&self) -> f64 {
        self.last_update
    }

    fn hidden(&self) -> bool {
        self.hidden
    }

    fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    fn dead(&self) -> bool {
        self.ttl <= 0.0
    }

    fn buffer_size(&self) -> usize {
        32
    }

    fn write(&self, sink: &mut SnapshotWriter) -> Result<(), WireError> {
        sink.write_payload(&self.state)
    }

    fn read(&mut self, source: &mut SnapshotReader, now: f64) -> Result<(), WireError> {
        let state: BulletState = source.read_payload()?;
        self.state = state;
        self.last_update = now;
        Ok(())
    }

    fn create(&mut self, mut agent: Box<dyn Agent>) {
        agent.set_position(self.state.position);
        self.agent = Some(agent);
    }

    fn update(&mut self, dt: f32) {
        if self.dead() {
            return;
        }
        self.ttl -= dt;
        self.state.position.x += self.state.velocity.x * dt;
        self.state.position.y += self.state.velocity.y * dt;
        self.state.position.z += self.state.velocity.z * dt;
        if let Some(agent) = self.agent.as_mut() {
            agent.set_position(self.state.position);
        }
    }

    fn damage(&mut self, source: &mut SnapshotReader) -> Result<(), WireError> {
        let _ = source.read_f32()?;
        Ok(())
    }

    fn kill(&mut self, _source: Option<&mut SnapshotReader>) -> Result<(), WireError> {
        self.ttl = 0.0;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
