//! Coordinator-free identifier allocation
//!
//! Every participant mints identifiers for the entities it creates, with
//! nobody handing out ranges. The 32-bit id space is split into 8 equal
//! sectors; a participant derives a starting sector from the session
//! roster alone, deterministically, so two participants that can both see
//! the roster start far apart without exchanging a single message. From
//! the starting point allocation is increment-and-probe against the
//! entity store.
//!
//! The derived starting point is only valid for one roster. Any join or
//! leave invalidates it and the next allocation re-derives.

/// Number of equal sectors the id space is split into. One per possible
/// participant.
pub const SECTOR_COUNT: u32 = 8;

/// Width of one sector: `2^32 / 8`.
pub const SECTOR_SIZE: u32 = 1 << 29;

/// Hands out locally unique ids that are also globally collision-free for
/// rosters of up to [`SECTOR_COUNT`] participants.
#[derive(Debug)]
pub struct IdAllocator {
    account_id: u32,
    next_id: Option<u32>,
}

impl IdAllocator {
    /// `account_id` is this participant's stable account identifier; its
    /// high bits choose the preferred sector.
    pub fn new(account_id: u32) -> Self {
        Self {
            account_id,
            next_id: None,
        }
    }

    pub fn account_id(&self) -> u32 {
        self.account_id
    }

    /// Forgets the derived starting point. Must be called whenever the
    /// participant set changes.
    pub fn invalidate(&mut self) {
        self.next_id = None;
    }

    /// Allocates the next identifier. `roster` is the current set of
    /// participant account ids (this participant included); `occupied`
    /// reports whether an id is already taken in the entity store, live
    /// or tombstoned.
    pub fn allocate<F: Fn(u32) -> bool>(&mut self, roster: &[u32], occupied: F) -> u32 {
        let mut id = match self.next_id {
            Some(id) => id,
            None => self.starting_sector(roster).wrapping_mul(SECTOR_SIZE),
        };
        while occupied(id) {
            id = id.wrapping_add(1);
        }
        self.next_id = Some(id.wrapping_add(1));
        id
    }

    /// Derives the starting sector from the roster.
    ///
    /// Participants sharing a sector are ordered by account id, highest
    /// first; everyone but the winner walks onward, draining one step per
    /// empty sector passed and picking up extra steps for every crowded
    /// one, so each walker lands in a distinct region. The hop guard only
    /// matters for rosters larger than the sector count, where the walk
    /// stops terminating and the linear probe carries correctness
    /// instead.
    fn starting_sector(&self, roster: &[u32]) -> u32 {
        let own_sector = self.account_id / SECTOR_SIZE;

        let mut population = [0i64; SECTOR_COUNT as usize];
        let mut steps: i64 = 0;
        for &account in roster {
            if account == self.account_id {
                continue;
            }
            let sector = account / SECTOR_SIZE;
            population[sector as usize] += 1;
            if sector == own_sector && account > self.account_id {
                steps += 1;
            }
        }

        let mut sector = own_sector;
        let mut hops = 0;
        while steps > 0 && hops < 2 * SECTOR_COUNT {
            sector = (sector + 1) % SECTOR_COUNT;
            steps += population[sector as usize] - 1;
            hops += 1;
        }
        sector
    }
}
