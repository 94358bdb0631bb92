//! Slab allocator: a fixed pool of overflow-chain slabs.
//!
//! Slabs hold bucket-chain overflow. They are born when a bucket's current
//! chain is full and die only through a losing link race (returned untouched)
//! or whole-store teardown; a slab that was ever linked stays linked.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::bitmap::FreeBitmap;
use crate::group::GROUP_WIDTH;
use crate::slab::{SlabAddr, EMPTY_PAIR_ADDR, EMPTY_SLAB_ADDR};

pub(crate) struct SlabPool {
    units: Box<[AtomicU32]>,
    bitmap: FreeBitmap,
}

impl SlabPool {
    /// Pool of `capacity` slabs, every unit initialized to the empty
    /// sentinel so a freshly claimed slab is immediately walkable.
    pub fn new(capacity: usize) -> Self {
        let units = (0..capacity * GROUP_WIDTH)
            .map(|_| AtomicU32::new(EMPTY_PAIR_ADDR))
            .collect();
        Self {
            units,
            bitmap: FreeBitmap::new(capacity),
        }
    }

    /// Claims one slab for the calling lane. Only the designated lane of a
    /// group calls this; the address is not broadcast to the other lanes.
    /// Returns [`EMPTY_SLAB_ADDR`] when the pool is exhausted.
    pub fn group_allocate(&self, lane_id: u32) -> SlabAddr {
        match self.bitmap.acquire(lane_id as usize) {
            Some(index) => index as SlabAddr,
            None => EMPTY_SLAB_ADDR,
        }
    }

    /// Returns a slab that lost the linking race. The slab must never have
    /// been linked into a chain: its units still hold the empty sentinel, so
    /// it can be handed out again as-is.
    pub fn free_untouched(&self, addr: SlabAddr) {
        debug_assert!((0..GROUP_WIDTH as u32)
            .all(|lane| self.unit(addr, lane).load(Ordering::Relaxed) == EMPTY_PAIR_ADDR));
        self.bitmap.release(addr as usize);
    }

    /// Unit read/written by `lane` when the group walks `slab`.
    #[inline]
    pub fn unit(&self, slab: SlabAddr, lane: u32) -> &AtomicU32 {
        &self.units[slab as usize * GROUP_WIDTH + lane as usize]
    }

    /// Slabs currently claimed: linked into chains, plus any in-flight
    /// speculative slab whose link race has not resolved yet.
    pub fn allocated(&self) -> usize {
        self.bitmap.in_use()
    }

    pub fn capacity(&self) -> usize {
        self.bitmap.capacity()
    }

    /// Returns every slab to the pool with all units re-sentineled.
    pub fn reset(&self) {
        for unit in self.units.iter() {
            unit.store(EMPTY_PAIR_ADDR, Ordering::Relaxed);
        }
        self.bitmap.reset();
    }
}
