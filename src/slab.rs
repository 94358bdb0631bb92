//! Slab geometry, internal addresses and the bucket table.
//!
//! All storage is addressed by `u32` handles into flat, pre-sized pools;
//! a handle is never a memory pointer. A slab is one group-width of units:
//! 31 data slots holding pair addresses plus a chain-pointer slot in the
//! last lane, linking to the next slab of the bucket.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::group::GROUP_WIDTH;

/// Internal address of a pair in the pair pool. Doubles as the iterator type
/// returned by search/insert/enumeration.
///
/// Iterators carry no generation tag: an address captured before a later
/// remove batch may afterwards reference freed or recycled storage. Callers
/// must not keep iterators across mutating batches on the same store.
pub type PairAddr = u32;

/// Internal address of a slab in the slab pool.
pub type SlabAddr = u32;

/// Sentinel stored in an unoccupied data slot. Never a valid pool address.
pub const EMPTY_PAIR_ADDR: PairAddr = 0xFFFF_FFFF;

/// Sentinel stored in a chain-pointer slot with no successor slab.
///
/// Shares its bit pattern with [`EMPTY_PAIR_ADDR`] so a fresh slab is
/// all-ones regardless of slot role.
pub const EMPTY_SLAB_ADDR: SlabAddr = 0xFFFF_FFFF;

/// Marker for "the group is walking the bucket's head slab", which lives in
/// the bucket table rather than the slab pool.
pub const HEAD_SLAB_ADDR: SlabAddr = 0xFFFF_FFFE;

/// Lane whose unit is the chain pointer.
pub const NEXT_PTR_LANE: u32 = (GROUP_WIDTH - 1) as u32;

/// Data slots per slab (every lane except the chain pointer).
pub const SLAB_DATA_SLOTS: usize = GROUP_WIDTH - 1;

/// Ballot mask selecting the data lanes of a slab.
pub const DATA_LANES_MASK: u32 = (1 << SLAB_DATA_SLOTS) - 1;

/// Upper bound on the key size, in bytes.
pub const MAX_KEY_BYTES: usize = 32;

/// Fixed array of head slabs, one per bucket.
///
/// Head slabs are laid out exactly like pool slabs (31 data slots + chain
/// pointer) so the walking protocol reads them through the same lane
/// indexing. The bucket count never changes and buckets are never rehashed.
pub struct BucketTable {
    units: Box<[AtomicU32]>,
    num_buckets: u32,
}

impl BucketTable {
    /// Allocates `num_buckets` head slabs with every unit set to the empty
    /// sentinel.
    pub fn new(num_buckets: u32) -> Self {
        let units = (0..num_buckets as usize * GROUP_WIDTH)
            .map(|_| AtomicU32::new(EMPTY_PAIR_ADDR))
            .collect();
        Self { units, num_buckets }
    }

    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    /// Unit read/written by `lane` when the group walks `bucket`'s head slab.
    #[inline]
    pub fn unit(&self, bucket: u32, lane: u32) -> &AtomicU32 {
        &self.units[bucket as usize * GROUP_WIDTH + lane as usize]
    }

    /// Restores every head slab to the empty pattern.
    pub(crate) fn reset(&self) {
        for unit in self.units.iter() {
            unit.store(EMPTY_PAIR_ADDR, Ordering::Relaxed);
        }
    }
}
