//! Admission control
//!
//! Bounds the number of objects any one participant can have live in the
//! shared simulation, and how fast one participant can announce the
//! high-frequency cosmetic bullet class. No quota outcome is an error:
//! a creation is granted, granted after evicting the owner's oldest
//! entities, or silently rejected. The ban list is checked ahead of any
//! quota and is fed both locally and by peers' out-of-band notices.
//!
//! Live counts are never cached: every admission prunes the owner's
//! ledger against the store first, so the ledger cannot drift from
//! reality.

use std::collections::{HashMap, HashSet};

use log::{debug, info};

use crate::entity::EntityKind;

/// Cap on heavyweight spawned objects (enemies, bosses, items) per owner.
pub const MAX_SPAWNED_PER_OWNER: usize = 16;

/// Cap on live plushies per owner.
pub const MAX_PLUSHIES_PER_OWNER: usize = 6;

/// Cap on live network-visible bullets per owner.
pub const MAX_ENTITY_BULLETS_PER_OWNER: usize = 12;

/// Common-bullet announcements allowed per owner per wall-clock second.
pub const MAX_COMMON_BULLETS_PER_SECOND: u32 = 12;

/// Quota class an entity kind is accounted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaClass {
    /// Capped live population, FIFO eviction (enemies, bosses, items).
    Spawned,
    /// Capped live population, FIFO eviction.
    Plushie,
    /// Capped live population, FIFO eviction.
    EntityBullet,
    /// Per-second rate cap, reject without eviction.
    CommonBullet,
    /// Never throttled (avatars).
    Exempt,
}

impl EntityKind {
    pub fn quota_class(self) -> QuotaClass {
        match self {
            EntityKind::Player => QuotaClass::Exempt,
            EntityKind::Enemy | EntityKind::BigEnemy | EntityKind::Item => QuotaClass::Spawned,
            EntityKind::Plushie => QuotaClass::Plushie,
            EntityKind::EntityBullet => QuotaClass::EntityBullet,
            EntityKind::CommonBullet => QuotaClass::CommonBullet,
        }
    }
}

/// Outcome of an admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Create the entity; kill the listed entity ids first (oldest
    /// entries of the owner's over-cap class, or every spawned entry for
    /// a big-enemy exclusivity eviction).
    Granted { evict: Vec<u32> },
    /// Drop the creation. The requester may keep a local cosmetic object;
    /// it gets no network identity.
    Rejected,
}

impl Admission {
    pub fn granted() -> Self {
        Admission::Granted { evict: Vec::new() }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted { .. })
    }
}

/// One owner's live entities, grouped by quota class, each list in
/// creation order. Index 0 after a prune is the oldest survivor — what
/// FIFO eviction removes.
#[derive(Debug, Default)]
struct OwnerLedger {
    spawned: Vec<u32>,
    /// Subset of `spawned`: ids recorded as big enemies, for the
    /// exclusivity rule.
    big_enemies: Vec<u32>,
    plushies: Vec<u32>,
    entity_bullets: Vec<u32>,
    common_bullets_this_second: u32,
}

/// Per-owner quota enforcement and the ban list.
///
/// The `live` callback passed to [`admit`] decides which ledger entries
/// still exist; dead and reclaimed ids are pruned lazily on the spot.
/// All state is per hosting session — [`reset`] wipes everything when a
/// new session starts.
///
/// [`admit`]: Administration::admit
/// [`reset`]: Administration::reset
#[derive(Debug, Default)]
pub struct Administration {
    ledgers: HashMap<u32, OwnerLedger>,
    banned: HashSet<u32>,
    bullet_second: u64,
}

impl Administration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests admission for a new entity of `kind` owned by `owner`.
    /// `is_live(id)` reports whether a previously recorded entity still
    /// exists; `now` is the local clock in seconds.
    ///
    /// The caller must perform the returned evictions and, if it goes on
    /// to create the entity, [`record`](Administration::record) it.
    pub fn admit<F: Fn(u32) -> bool>(
        &mut self,
        owner: u32,
        kind: EntityKind,
        is_live: F,
        now: f64,
    ) -> Admission {
        if self.banned.contains(&owner) {
            debug!("admission denied: owner {} is banned", owner);
            return Admission::Rejected;
        }

        self.roll_bullet_second(now);

        let ledger = self.ledgers.entry(owner).or_default();
        match kind.quota_class() {
            QuotaClass::Exempt => Admission::granted(),
            QuotaClass::CommonBullet => {
                if ledger.common_bullets_this_second >= MAX_COMMON_BULLETS_PER_SECOND {
                    debug!("common-bullet rate cap hit for owner {}", owner);
                    return Admission::Rejected;
                }
                ledger.common_bullets_this_second += 1;
                Admission::granted()
            }
            QuotaClass::Spawned => {
                ledger.spawned.retain(|id| is_live(*id));
                ledger.big_enemies.retain(|id| is_live(*id));
                let mut evict = Vec::new();
                if kind == EntityKind::BigEnemy && !ledger.big_enemies.is_empty() {
                    // At most one big enemy per owner; a second claim
                    // clears the owner's whole spawned class.
                    evict.append(&mut ledger.spawned);
                    ledger.big_enemies.clear();
                } else {
                    while ledger.spawned.len() + 1 > MAX_SPAWNED_PER_OWNER {
                        evict.push(ledger.spawned.remove(0));
                    }
                }
                if !evict.is_empty() {
                    debug!(
                        "owner {} over spawned quota, evicting {} entities",
                        owner,
                        evict.len()
                    );
                }
                Admission::Granted { evict }
            }
            QuotaClass::Plushie => {
                ledger.plushies.retain(|id| is_live(*id));
                let evict = drain_over_cap(&mut ledger.plushies, MAX_PLUSHIES_PER_OWNER);
                Admission::Granted { evict }
            }
            QuotaClass::EntityBullet => {
                ledger.entity_bullets.retain(|id| is_live(*id));
                let evict = drain_over_cap(&mut ledger.entity_bullets, MAX_ENTITY_BULLETS_PER_OWNER);
                Admission::Granted { evict }
            }
        }
    }

    /// Records a created entity in its owner's ledger. Kinds without a
    /// live-population ledger (avatars, cosmetic bullets) are not
    /// tracked.
    pub fn record(&mut self, owner: u32, kind: EntityKind, id: u32) {
        let ledger = self.ledgers.entry(owner).or_default();
        match kind.quota_class() {
            QuotaClass::Spawned => {
                ledger.spawned.push(id);
                if kind == EntityKind::BigEnemy {
                    ledger.big_enemies.push(id);
                }
            }
            QuotaClass::Plushie => ledger.plushies.push(id),
            QuotaClass::EntityBullet => ledger.entity_bullets.push(id),
            QuotaClass::CommonBullet | QuotaClass::Exempt => {}
        }
    }

    /// Bans an owner locally. The dispatch glue pairs this with the
    /// out-of-band notice so peers ban independently.
    pub fn ban(&mut self, owner: u32) {
        if self.banned.insert(owner) {
            info!("owner {} banned", owner);
        }
    }

    /// Ingests a peer's ban notice.
    pub fn apply_notice(&mut self, owner: u32) {
        if self.banned.insert(owner) {
            info!("owner {} banned via peer notice", owner);
        }
    }

    pub fn is_banned(&self, owner: u32) -> bool {
        self.banned.contains(&owner)
    }

    /// Live count for an owner's quota class, pruned on the spot.
    pub fn live_count<F: Fn(u32) -> bool>(
        &mut self,
        owner: u32,
        class: QuotaClass,
        is_live: F,
    ) -> usize {
        let Some(ledger) = self.ledgers.get_mut(&owner) else {
            return 0;
        };
        let list = match class {
            QuotaClass::Spawned => &mut ledger.spawned,
            QuotaClass::Plushie => &mut ledger.plushies,
            QuotaClass::EntityBullet => &mut ledger.entity_bullets,
            QuotaClass::CommonBullet | QuotaClass::Exempt => return 0,
        };
        list.retain(|id| is_live(*id));
        list.len()
    }

    /// Wipes every counter, ledger and the ban set. New hosting context
    /// only; nothing persists across sessions.
    pub fn reset(&mut self) {
        self.ledgers.clear();
        self.banned.clear();
        self.bullet_second = 0;
    }

    /// Advances the wall-clock second bucket, zeroing every owner's
    /// common-bullet counter when the bucket changes.
    fn roll_bullet_second(&mut self, now: f64) {
        let second = now.max(0.0) as u64;
        if second != self.bullet_second {
            self.bullet_second = second;
            for ledger in self.ledgers.values_mut() {
                ledger.common_bullets_this_second = 0;
            }
        }
    }
}

/// Removes oldest entries until inserting one more would fit the cap.
fn drain_over_cap(list: &mut Vec<u32>, cap: usize) -> Vec<u32> {
    let mut evicted = Vec::new();
    while list.len() + 1 > cap {
        evicted.push(list.remove(0));
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Grants `count` entities of `kind` for `owner`, performing
    /// evictions against `alive`, and returns the ids created.
    fn fill(
        admin: &mut Administration,
        alive: &mut HashSet<u32>,
        owner: u32,
        kind: EntityKind,
        count: usize,
        first_id: u32,
    ) -> Vec<u32> {
        let mut created = Vec::new();
        for offset in 0..count as u32 {
            let id = first_id + offset;
            match admin.admit(owner, kind, |id| alive.contains(&id), 0.0) {
                Admission::Granted { evict } => {
                    for evicted in evict {
                        alive.remove(&evicted);
                    }
                    alive.insert(id);
                    admin.record(owner, kind, id);
                    created.push(id);
                }
                Admission::Rejected => {}
            }
        }
        created
    }

    #[test]
    fn test_spawned_cap_evicts_oldest() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();

        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 17, 100);

        assert_eq!(alive.len(), MAX_SPAWNED_PER_OWNER);
        // Exactly the first-created entity was evicted.
        assert!(!alive.contains(&100));
        assert!(alive.contains(&101));
        assert!(alive.contains(&116));
    }

    #[test]
    fn test_fifo_eviction_is_oldest_surviving() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();

        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 16, 100);
        // The oldest entity dies on its own; the prune must not shift
        // eviction onto the wrong entry.
        alive.remove(&100);

        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 1, 200);
        // Room was made by the organic death: nothing else evicted.
        assert!(alive.contains(&101));
        assert_eq!(alive.len(), 16);

        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 1, 201);
        // Now the oldest survivor goes.
        assert!(!alive.contains(&101));
        assert!(alive.contains(&102));
    }

    #[test]
    fn test_quotas_are_per_owner() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();

        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 16, 100);
        let other = fill(&mut admin, &mut alive, 2, EntityKind::Enemy, 16, 500);

        assert_eq!(other.len(), 16);
        assert_eq!(alive.len(), 32);
        assert!(alive.contains(&100));
    }

    #[test]
    fn test_plushie_and_entity_bullet_caps() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();

        fill(&mut admin, &mut alive, 1, EntityKind::Plushie, 7, 100);
        assert_eq!(
            alive.iter().filter(|id| **id >= 100 && **id < 200).count(),
            MAX_PLUSHIES_PER_OWNER
        );
        assert!(!alive.contains(&100));

        fill(&mut admin, &mut alive, 1, EntityKind::EntityBullet, 13, 200);
        assert_eq!(
            alive.iter().filter(|id| **id >= 200).count(),
            MAX_ENTITY_BULLETS_PER_OWNER
        );
        assert!(!alive.contains(&200));
    }

    #[test]
    fn test_big_enemy_exclusivity() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();

        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 5, 100);
        fill(&mut admin, &mut alive, 1, EntityKind::BigEnemy, 1, 300);
        assert_eq!(alive.len(), 6);

        // A second big enemy clears the owner's entire spawned class.
        let created = fill(&mut admin, &mut alive, 1, EntityKind::BigEnemy, 1, 301);
        assert_eq!(created, vec![301]);
        assert_eq!(alive.len(), 1);
        assert!(alive.contains(&301));
    }

    #[test]
    fn test_common_bullet_rate_cap() {
        let mut admin = Administration::new();
        let mut rejected = 0;
        for _ in 0..13 {
            match admin.admit(1, EntityKind::CommonBullet, |_| true, 5.2) {
                Admission::Granted { .. } => {}
                Admission::Rejected => rejected += 1,
            }
        }
        assert_eq!(rejected, 1);

        // Next wall-clock second: the counter is back to zero.
        assert!(admin
            .admit(1, EntityKind::CommonBullet, |_| true, 6.0)
            .is_granted());
    }

    #[test]
    fn test_common_bullet_rejection_has_no_evictions() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();
        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 3, 100);

        for _ in 0..20 {
            let _ = admin.admit(1, EntityKind::CommonBullet, |id| alive.contains(&id), 0.0);
        }
        assert_eq!(alive.len(), 3);
    }

    #[test]
    fn test_avatar_is_exempt() {
        let mut admin = Administration::new();
        for _ in 0..100 {
            assert!(admin.admit(1, EntityKind::Player, |_| true, 0.0).is_granted());
        }
    }

    #[test]
    fn test_banned_owner_rejected_before_quota() {
        let mut admin = Administration::new();
        admin.ban(7);
        assert!(admin.is_banned(7));
        assert_eq!(
            admin.admit(7, EntityKind::Player, |_| true, 0.0),
            Admission::Rejected
        );
        assert_eq!(
            admin.admit(7, EntityKind::Enemy, |_| true, 0.0),
            Admission::Rejected
        );
    }

    #[test]
    fn test_peer_notice_bans() {
        let mut admin = Administration::new();
        admin.apply_notice(9);
        assert!(admin.is_banned(9));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();
        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 16, 100);
        admin.ban(2);

        admin.reset();

        assert!(!admin.is_banned(2));
        assert_eq!(
            admin.live_count(1, QuotaClass::Spawned, |id| alive.contains(&id)),
            0
        );
        let created = fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 1, 300);
        assert_eq!(created.len(), 1);
    }

    #[test]
    fn test_live_count_prunes_lazily() {
        let mut admin = Administration::new();
        let mut alive = HashSet::new();
        fill(&mut admin, &mut alive, 1, EntityKind::Enemy, 10, 100);

        alive.remove(&103);
        alive.remove(&107);

        assert_eq!(
            admin.live_count(1, QuotaClass::Spawned, |id| alive.contains(&id)),
            8
        );
    }
}
