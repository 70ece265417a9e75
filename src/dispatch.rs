//! Dispatch glue
//!
//! [`Networking`] is the seam between the transport collaborator and the
//! replication core. The transport hands it already-dequeued
//! `(sender, bytes)` payloads; it routes them by frame discriminator,
//! applies snapshots to existing entities, and mints new ones through
//! admission control and the identifier allocator. Every simulation tick
//! it drives entity updates, and on the snapshot cadence it serializes
//! one pool's worth of locally owned entities into outbound buffers for
//! the transport to broadcast.
//!
//! Nothing here returns an error to the caller: a payload that cannot be
//! applied is logged and dropped, and the entity it addressed keeps its
//! last-known-good state.

use log::{debug, info, warn};

use crate::admission::{Administration, Admission};
use crate::allocator::IdAllocator;
use crate::entity::{AgentFactory, AvatarIndex, Entity, EntityKind, NullAgents, Registry};
use crate::store::{Pools, POOL_COUNT};
use crate::wire::{
    decode_frame, encode_frame, BanNotice, PacketKind, SnapshotReader, SnapshotWriter,
};

/// Where the transport should deliver an outbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Broadcast,
    Peer(u32),
}

/// One outbound wire buffer, ready for the transport.
#[derive(Debug)]
pub struct Outbound {
    pub bytes: Vec<u8>,
    pub target: Target,
}

impl Outbound {
    fn broadcast(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            target: Target::Broadcast,
        }
    }
}

/// Routes inbound payloads and tick-drives the replication core.
pub struct Networking {
    pools: Pools<Box<dyn Entity>>,
    allocator: IdAllocator,
    administration: Administration,
    registry: Registry,
    agents: Box<dyn AgentFactory>,
    roster: Vec<u32>,
    avatars: AvatarIndex,
    /// Pool visited by the next snapshot emission; advances round-robin
    /// so a full-population pass costs four emissions.
    emit_pool: usize,
}

impl Networking {
    /// `local_account` is this participant's stable account id. The
    /// roster starts as just ourselves; the session layer feeds changes
    /// through [`set_roster`](Networking::set_roster).
    pub fn new(local_account: u32, registry: Registry) -> Self {
        Self::with_agents(local_account, registry, Box::new(NullAgents))
    }

    /// As [`new`](Networking::new) with a presentation-layer agent
    /// factory for materializing world objects.
    pub fn with_agents(
        local_account: u32,
        registry: Registry,
        agents: Box<dyn AgentFactory>,
    ) -> Self {
        Self {
            pools: Pools::new(),
            allocator: IdAllocator::new(local_account),
            administration: Administration::new(),
            registry,
            agents,
            roster: vec![local_account],
            avatars: AvatarIndex::new(),
            emit_pool: 0,
        }
    }

    pub fn local_account(&self) -> u32 {
        self.allocator.account_id()
    }

    pub fn pools(&self) -> &Pools<Box<dyn Entity>> {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut Pools<Box<dyn Entity>> {
        &mut self.pools
    }

    pub fn administration(&self) -> &Administration {
        &self.administration
    }

    pub fn roster(&self) -> &[u32] {
        &self.roster
    }

    /// Entity id of a participant's avatar, if one is live.
    pub fn avatar_of(&self, account: u32) -> Option<u32> {
        self.avatars.get(&account).copied()
    }

    /// Ingests one payload delivered by the transport. Never fails
    /// outward; malformed or unwelcome payloads are logged and dropped.
    pub fn handle_payload(&mut self, sender: u32, bytes: &[u8], now: f64) {
        if self.administration.is_banned(sender) {
            debug!("dropping payload from banned sender {}", sender);
            return;
        }

        let (kind, id, body) = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("dropping malformed frame from {}: {}", sender, err);
                return;
            }
        };

        match kind {
            PacketKind::Snapshot => self.apply_snapshot(sender, id, body, now),
            PacketKind::Death => self.apply_death(id, body),
            PacketKind::Damage => self.apply_damage(id, body),
            PacketKind::Ban => self.apply_ban_notice(sender, id, body),
        }
    }

    fn apply_snapshot(&mut self, sender: u32, id: u32, body: &[u8], now: f64) {
        let mut reader = SnapshotReader::new(body);
        let kind = match reader.read_u8().and_then(EntityKind::from_u8) {
            Ok(kind) => kind,
            Err(err) => {
                warn!("dropping snapshot for {}: {}", id, err);
                return;
            }
        };

        if let Some(entity) = self.pools.get_mut(id) {
            if entity.kind() != kind {
                warn!(
                    "dropping snapshot for {}: kind {:?} does not match live {:?}",
                    id,
                    kind,
                    entity.kind()
                );
                return;
            }
            if let Err(err) = entity.read(&mut reader, now) {
                // The entity keeps its last-known-good state; only this
                // snapshot is lost.
                warn!("dropping snapshot for {}: {}", id, err);
            }
            return;
        }

        if self.pools.occupied(id) {
            debug!("ignoring snapshot for tombstoned id {}", id);
            return;
        }

        self.create_remote(sender, id, kind, &mut reader, now);
    }

    /// First snapshot for an unknown id: mint the entity, subject to
    /// admission control with the sender as owner.
    fn create_remote(
        &mut self,
        sender: u32,
        id: u32,
        kind: EntityKind,
        reader: &mut SnapshotReader,
        now: f64,
    ) {
        let Some(mut entity) = self.registry.spawn(kind, id, sender, now) else {
            debug!("no supplier for entity kind {:?}, dropping creation", kind);
            return;
        };
        if let Err(err) = entity.read(reader, now) {
            warn!("dropping creation snapshot for {}: {}", id, err);
            return;
        }

        let pools = &self.pools;
        match self
            .administration
            .admit(sender, kind, |eid| pools.contains(eid), now)
        {
            Admission::Rejected => {
                debug!("admission rejected {:?} from owner {}", kind, sender);
            }
            Admission::Granted { evict } => {
                for evicted in evict {
                    self.destroy(evicted);
                }
                entity.create(self.agents.agent_for(id, kind));
                if kind == EntityKind::Player {
                    self.avatars.insert(sender, id);
                }
                self.pools.set(id, entity);
                self.administration.record(sender, kind, id);
                debug!("created remote {:?} {} owned by {}", kind, id, sender);
            }
        }
    }

    fn apply_death(&mut self, id: u32, body: &[u8]) {
        if let Some(entity) = self.pools.get_mut(id) {
            let mut reader = SnapshotReader::new(body);
            let payload = if body.is_empty() { None } else { Some(&mut reader) };
            if let Err(err) = entity.kill(payload) {
                warn!("death payload for {} unreadable: {}", id, err);
            }
            self.destroy(id);
        } else {
            // Already gone; death is idempotent across the session.
            debug!("death for unknown entity {}", id);
        }
    }

    fn apply_damage(&mut self, id: u32, body: &[u8]) {
        if let Some(entity) = self.pools.get_mut(id) {
            let mut reader = SnapshotReader::new(body);
            if let Err(err) = entity.damage(&mut reader) {
                warn!("damage payload for {} unreadable: {}", id, err);
                return;
            }
            if entity.dead() {
                self.destroy(id);
            }
        } else {
            debug!("damage for unknown entity {}", id);
        }
    }

    fn apply_ban_notice(&mut self, sender: u32, banned: u32, body: &[u8]) {
        let mut reader = SnapshotReader::new(body);
        match reader.read_payload::<BanNotice>() {
            Ok(notice) => {
                info!(
                    "peer {} announced ban of {}: {}",
                    sender, banned, notice.reason
                );
                self.administration.apply_notice(banned);
            }
            Err(err) => warn!("dropping ban notice from {}: {}", sender, err),
        }
    }

    /// Creates a locally owned entity, returning its freshly allocated
    /// id, or `None` when admission control rejects the request. Not for
    /// cosmetic common bullets, which never receive a network identity —
    /// see [`request_common_bullet`](Networking::request_common_bullet).
    pub fn spawn_local(&mut self, kind: EntityKind, now: f64) -> Option<u32> {
        debug_assert_ne!(kind, EntityKind::CommonBullet);
        let local = self.local_account();

        let pools = &self.pools;
        match self
            .administration
            .admit(local, kind, |eid| pools.contains(eid), now)
        {
            Admission::Rejected => {
                debug!("local spawn of {:?} rejected", kind);
                None
            }
            Admission::Granted { evict } => {
                for evicted in evict {
                    self.destroy(evicted);
                }

                let pools = &self.pools;
                let id = self.allocator.allocate(&self.roster, |i| pools.occupied(i));

                let mut entity = self.registry.spawn(kind, id, local, now)?;
                entity.create(self.agents.agent_for(id, kind));
                if kind == EntityKind::Player {
                    self.avatars.insert(local, id);
                }
                self.pools.set(id, entity);
                self.administration.record(local, kind, id);
                Some(id)
            }
        }
    }

    /// Asks permission to fire one cosmetic common bullet. A `false`
    /// return means the per-second cap is spent; the caller may still
    /// show the bullet locally but must not announce it.
    pub fn request_common_bullet(&mut self, now: f64) -> bool {
        let local = self.local_account();
        let pools = &self.pools;
        self.administration
            .admit(local, EntityKind::CommonBullet, |eid| pools.contains(eid), now)
            .is_granted()
    }

    /// Per-tick simulation step: updates every non-hidden live entity,
    /// then reaps entities that died during the step (expired bullets).
    pub fn tick(&mut self, dt: f32) {
        for id in self.pools.live_ids() {
            if let Some(entity) = self.pools.get_mut(id) {
                if !entity.hidden() {
                    entity.update(dt);
                }
            }
        }

        let dead: Vec<u32> = self
            .pools
            .iter_matching(|_, entity| entity.dead())
            .map(|(id, _)| id)
            .collect();
        for id in dead {
            self.destroy(id);
        }
    }

    /// Serializes snapshots for the locally owned entities of one pool
    /// and advances the pool cursor, so four emissions cover the whole
    /// population. Called on the snapshot cadence, not every tick.
    pub fn emit_snapshots(&mut self) -> Vec<Outbound> {
        let pool = self.emit_pool;
        self.emit_pool = (self.emit_pool + 1) % POOL_COUNT;

        let local = self.local_account();
        let mut out = Vec::new();
        for (id, entity) in self.pools.iter_pool(pool) {
            if entity.owner() != local || entity.hidden() || entity.dead() {
                continue;
            }
            let mut sink = SnapshotWriter::with_capacity(1 + entity.buffer_size());
            sink.write_u8(entity.kind() as u8);
            if let Err(err) = entity.write(&mut sink) {
                warn!("skipping snapshot of {}: {}", id, err);
                continue;
            }
            out.push(Outbound::broadcast(encode_frame(
                PacketKind::Snapshot,
                id,
                sink.as_bytes(),
            )));
        }
        out
    }

    /// Kills a local entity and produces the death notification for
    /// peers. No-op (and no frame) if the id is not live.
    pub fn kill_entity(&mut self, id: u32) -> Option<Outbound> {
        if !self.pools.contains(id) {
            return None;
        }
        self.destroy(id);
        Some(Outbound::broadcast(encode_frame(PacketKind::Death, id, &[])))
    }

    /// Applies damage locally and produces the damage frame for peers.
    pub fn deal_damage(&mut self, id: u32, amount: f32) -> Option<Outbound> {
        let mut sink = SnapshotWriter::with_capacity(4);
        sink.write_f32(amount);
        let body = sink.into_bytes();
        self.apply_damage(id, &body);
        Some(Outbound::broadcast(encode_frame(
            PacketKind::Damage,
            id,
            &body,
        )))
    }

    /// Bans an owner: their payloads are dropped from now on, their
    /// entities are destroyed, and the returned notice lets every peer
    /// ban them independently.
    pub fn ban(&mut self, owner: u32, reason: &str) -> Outbound {
        self.administration.ban(owner);

        let owned: Vec<u32> = self
            .pools
            .iter_matching(|_, entity| entity.owner() == owner)
            .map(|(id, _)| id)
            .collect();
        for id in owned {
            self.destroy(id);
        }

        let mut sink = SnapshotWriter::default();
        // BanNotice serialization cannot fail for a plain string.
        let _ = sink.write_payload(&BanNotice {
            reason: reason.to_string(),
        });
        Outbound::broadcast(encode_frame(PacketKind::Ban, owner, sink.as_bytes()))
    }

    /// Replaces the participant roster after a join or leave. Invalidates
    /// the allocator's starting point and disposes of departed owners'
    /// entities per their orphan policy.
    pub fn set_roster(&mut self, roster: Vec<u32>, now: f64) {
        let departed: Vec<u32> = self
            .roster
            .iter()
            .copied()
            .filter(|account| !roster.contains(account))
            .collect();

        self.roster = roster;
        self.allocator.invalidate();

        for account in departed {
            info!("participant {} left", account);
            self.avatars.remove(&account);
            self.release_orphans(account, now);
        }
    }

    /// Starts a fresh hosting context: all entities, quotas, bans and
    /// the id cursor are dropped.
    pub fn reset_session(&mut self) {
        self.pools.clear();
        self.administration.reset();
        self.allocator.invalidate();
        self.avatars.clear();
        self.emit_pool = 0;
        info!("session reset");
    }

    /// Disposes of a departed participant's entities: reassignable ones
    /// move to the lowest surviving account, the rest are destroyed.
    fn release_orphans(&mut self, departed: u32, now: f64) {
        let heir = self.roster.iter().copied().min();

        let orphans: Vec<u32> = self
            .pools
            .iter_matching(|_, entity| entity.owner() == departed)
            .map(|(id, _)| id)
            .collect();

        for id in orphans {
            let reassignable = self
                .pools
                .get(id)
                .map(|entity| entity.orphan_policy() == crate::entity::OrphanPolicy::Reassign)
                .unwrap_or(false);

            match (reassignable, heir) {
                (true, Some(heir)) => {
                    if let Some(entity) = self.pools.get_mut(id) {
                        entity.reassign_owner(heir, now);
                        debug!("entity {} reassigned from {} to {}", id, departed, heir);
                    }
                }
                _ => self.destroy(id),
            }
        }
    }

    /// Kills and unmaps an entity, leaving a tombstone where its kind
    /// demands one.
    fn destroy(&mut self, id: u32) {
        let Some(entity) = self.pools.get_mut(id) else {
            return;
        };
        let _ = entity.kill(None);
        let tombstone = entity.leaves_tombstone();
        let kind = entity.kind();
        let owner = entity.owner();

        if tombstone {
            self.pools.bury(id);
        } else {
            self.pools.remove(id);
        }
        if kind == EntityKind::Player && self.avatars.get(&owner) == Some(&id) {
            self.avatars.remove(&owner);
        }
    }
}
