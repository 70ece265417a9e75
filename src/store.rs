//! The entity store
//!
//! A fixed-bucket hash map from 32-bit identifier to entity, plus the
//! 4-way pool partition that lets callers spread a full-population scan
//! over several ticks. Buckets are selected by `id & 1023`; since the
//! bucket count is a multiple of 4, walking buckets `k, k + 4, k + 8, ..`
//! visits exactly the entries with `id % 4 == k`.
//!
//! A slot is tri-state: absent, live, or tombstoned. Tombstones pin an
//! identifier after certain deaths so a stale snapshot cannot resurrect
//! the object under the same id; they count as occupied for the
//! identifier allocator but are invisible to lookups.

/// Number of hash buckets. Must stay a power of two (bucket selection is
/// a mask) and a multiple of [`POOL_COUNT`].
pub const BUCKET_COUNT: usize = 1024;

/// Number of disjoint iteration pools (`id % 4`).
pub const POOL_COUNT: usize = 4;

const BUCKET_MASK: u32 = (BUCKET_COUNT - 1) as u32;

#[derive(Debug)]
enum Slot<T> {
    Live(T),
    Tombstone,
}

#[derive(Debug)]
struct Entry<T> {
    id: u32,
    slot: Slot<T>,
}

/// Id-keyed entity map with partitioned iteration.
///
/// Lookup, insert and removal touch exactly one bucket chain; chains are
/// kept in insertion order and traversed linearly, which stays cheap at
/// the entity counts this domain sees.
#[derive(Debug)]
pub struct Pools<T> {
    buckets: Vec<Vec<Entry<T>>>,
    live: usize,
}

impl<T> Default for Pools<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pools<T> {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
            live: 0,
        }
    }

    fn bucket_of(id: u32) -> usize {
        (id & BUCKET_MASK) as usize
    }

    /// The iteration pool an identifier belongs to.
    pub fn pool_of(id: u32) -> usize {
        (id % POOL_COUNT as u32) as usize
    }

    /// Inserts or replaces the entry for `id`, returning the previous
    /// live value if there was one. Writing over a tombstone revives the
    /// slot; the paths that must respect tombstones check [`occupied`]
    /// before minting an id.
    ///
    /// [`occupied`]: Pools::occupied
    pub fn set(&mut self, id: u32, value: T) -> Option<T> {
        let bucket = &mut self.buckets[Self::bucket_of(id)];
        for entry in bucket.iter_mut() {
            if entry.id == id {
                let old = std::mem::replace(&mut entry.slot, Slot::Live(value));
                return match old {
                    Slot::Live(old) => Some(old),
                    Slot::Tombstone => {
                        self.live += 1;
                        None
                    }
                };
            }
        }
        bucket.push(Entry {
            id,
            slot: Slot::Live(value),
        });
        self.live += 1;
        None
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.buckets[Self::bucket_of(id)]
            .iter()
            .find(|entry| entry.id == id)
            .and_then(|entry| match &entry.slot {
                Slot::Live(value) => Some(value),
                Slot::Tombstone => None,
            })
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.buckets[Self::bucket_of(id)]
            .iter_mut()
            .find(|entry| entry.id == id)
            .and_then(|entry| match &mut entry.slot {
                Slot::Live(value) => Some(value),
                Slot::Tombstone => None,
            })
    }

    /// True if `id` maps to a live entry.
    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// True if `id` is taken at all, live or tombstoned. This is what the
    /// identifier allocator probes.
    pub fn occupied(&self, id: u32) -> bool {
        self.buckets[Self::bucket_of(id)]
            .iter()
            .any(|entry| entry.id == id)
    }

    /// Removes the entry for `id` entirely, tombstone included. Returns
    /// the value only if the slot was live.
    pub fn remove(&mut self, id: u32) -> Option<T> {
        let bucket = &mut self.buckets[Self::bucket_of(id)];
        let index = bucket.iter().position(|entry| entry.id == id)?;
        match bucket.remove(index).slot {
            Slot::Live(value) => {
                self.live -= 1;
                Some(value)
            }
            Slot::Tombstone => None,
        }
    }

    /// Replaces the entry for `id` with a permanent tombstone, creating
    /// one even if the id was unoccupied. Returns the displaced live
    /// value if there was one.
    pub fn bury(&mut self, id: u32) -> Option<T> {
        let bucket = &mut self.buckets[Self::bucket_of(id)];
        for entry in bucket.iter_mut() {
            if entry.id == id {
                let old = std::mem::replace(&mut entry.slot, Slot::Tombstone);
                return match old {
                    Slot::Live(value) => {
                        self.live -= 1;
                        Some(value)
                    }
                    Slot::Tombstone => None,
                };
            }
        }
        bucket.push(Entry {
            id,
            slot: Slot::Tombstone,
        });
        None
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Drops every entry, tombstones included. Session restart only;
    /// mid-session this would void the id-reuse guarantee.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.live = 0;
    }

    /// Visits live entries in buckets `start, start + step, ..`. With
    /// `step == POOL_COUNT` this is one pool; with `step == 1` and
    /// `start == 0` the whole population.
    pub fn each<F: FnMut(u32, &T)>(&self, start: usize, step: usize, mut visit: F) {
        assert!(step > 0);
        let mut bucket_index = start;
        while bucket_index < BUCKET_COUNT {
            for entry in &self.buckets[bucket_index] {
                if let Slot::Live(value) = &entry.slot {
                    visit(entry.id, value);
                }
            }
            bucket_index += step;
        }
    }

    pub fn each_mut<F: FnMut(u32, &mut T)>(&mut self, start: usize, step: usize, mut visit: F) {
        assert!(step > 0);
        let mut bucket_index = start;
        while bucket_index < BUCKET_COUNT {
            for entry in &mut self.buckets[bucket_index] {
                if let Slot::Live(value) = &mut entry.slot {
                    visit(entry.id, value);
                }
            }
            bucket_index += step;
        }
    }

    /// Iterates every live entry.
    pub fn iter_live(&self) -> impl Iterator<Item = (u32, &T)> {
        self.buckets.iter().flat_map(|bucket| {
            bucket.iter().filter_map(|entry| match &entry.slot {
                Slot::Live(value) => Some((entry.id, value)),
                Slot::Tombstone => None,
            })
        })
    }

    /// Iterates the live entries of one pool.
    pub fn iter_pool(&self, pool: usize) -> impl Iterator<Item = (u32, &T)> {
        assert!(pool < POOL_COUNT);
        self.buckets
            .iter()
            .skip(pool)
            .step_by(POOL_COUNT)
            .flat_map(|bucket| {
                bucket.iter().filter_map(|entry| match &entry.slot {
                    Slot::Live(value) => Some((entry.id, value)),
                    Slot::Tombstone => None,
                })
            })
    }

    /// Iterates live entries matching a predicate.
    pub fn iter_matching<'a, P>(&'a self, mut predicate: P) -> impl Iterator<Item = (u32, &'a T)>
    where
        P: FnMut(u32, &T) -> bool + 'a,
    {
        self.iter_live()
            .filter(move |&(id, value)| predicate(id, value))
    }

    /// Ids of all live entries in one pool, snapshotted for callers that
    /// need to mutate the store while walking it.
    pub fn pool_live_ids(&self, pool: usize) -> Vec<u32> {
        self.iter_pool(pool).map(|(id, _)| id).collect()
    }

    /// Ids of every live entry.
    pub fn live_ids(&self) -> Vec<u32> {
        self.iter_live().map(|(id, _)| id).collect()
    }
}
