//! The algorithmic core: bucket selection and the cooperative-group walking
//! protocols for insert, search and remove.
//!
//! A group serves up to [`GROUP_WIDTH`] queries per batch tile. Each protocol
//! iteration ballots the still-pending lanes into a work queue, picks the
//! lowest pending lane as the source, broadcasts its bucket and key, lets
//! every lane read one unit of the current slab, and resolves the source from
//! the resulting ballots: key found, empty slot found, or a chain link to
//! follow or install. Once a source resolves, the next pending lane takes
//! over and the walk restarts from the bucket head.
//!
//! Everything here is per-slot CAS plus group voting; there is no lock and no
//! blocking anywhere. Groups touching disjoint buckets proceed fully in
//! parallel; groups racing on the same bucket serialize only at the slot they
//! contend for.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::group::{self, LaneMask, GROUP_WIDTH};
use crate::hash::KeyHash;
use crate::pair_pool::PairPool;
use crate::slab::{
    BucketTable, PairAddr, SlabAddr, DATA_LANES_MASK, EMPTY_PAIR_ADDR, EMPTY_SLAB_ADDR,
    HEAD_SLAB_ADDR, MAX_KEY_BYTES, NEXT_PTR_LANE,
};
use crate::slab_pool::SlabPool;

/// Borrowed view of the store's shared state plus the hash configuration.
///
/// The context is stateless and `Copy`; one value is shared by every group of
/// a batch. All mutation goes through the atomic units it references.
#[derive(Clone, Copy)]
pub(crate) struct SlabHashContext<'a, H: KeyHash> {
    pub buckets: &'a BucketTable,
    pub slabs: &'a SlabPool,
    pub pairs: &'a PairPool,
    pub hasher: H,
    pub key_size: usize,
    pub value_size: usize,
}

impl<'a, H: KeyHash> SlabHashContext<'a, H> {
    /// Bucket index for a key.
    #[inline]
    pub fn compute_bucket(&self, key: &[u8]) -> u32 {
        (self.hasher.hash(key) % u64::from(self.buckets.num_buckets())) as u32
    }

    /// Resolves the unit a lane reads: head slabs live in the bucket table,
    /// chained slabs in the slab pool.
    #[inline]
    fn unit(&self, bucket: u32, slab: SlabAddr, lane: u32) -> &AtomicU32 {
        if slab == HEAD_SLAB_ADDR {
            self.buckets.unit(bucket, lane)
        } else {
            self.slabs.unit(slab, lane)
        }
    }

    /// One unit per lane from the current slab: the group's shared snapshot
    /// for this protocol iteration.
    fn read_units(&self, bucket: u32, slab: SlabAddr) -> [u32; GROUP_WIDTH] {
        let mut units = [EMPTY_PAIR_ADDR; GROUP_WIDTH];
        for lane in 0..GROUP_WIDTH as u32 {
            units[lane as usize] = self.unit(bucket, slab, lane).load(Ordering::Acquire);
        }
        units
    }

    /// Broadcasts the source lane's key into the group-shared buffer.
    fn broadcast_key(dst: &mut [u8; MAX_KEY_BYTES], keys: &[u8], key_size: usize, src_lane: u32) {
        let offset = src_lane as usize * key_size;
        dst[..key_size].copy_from_slice(&keys[offset..offset + key_size]);
    }

    /// Lowest data lane whose unit references a pair storing `key`.
    fn find_key_lane(&self, units: &[u32; GROUP_WIDTH], key: &[u8]) -> Option<u32> {
        let found = group::ballot(|lane| {
            (1 << lane) & DATA_LANES_MASK != 0
                && units[lane as usize] != EMPTY_PAIR_ADDR
                && self.pairs.key_equals(units[lane as usize], key)
        });
        group::first_lane(found)
    }

    /// Lowest data lane whose unit is the empty sentinel.
    fn find_empty_lane(units: &[u32; GROUP_WIDTH]) -> Option<u32> {
        let empty = group::ballot(|lane| {
            (1 << lane) & DATA_LANES_MASK != 0 && units[lane as usize] == EMPTY_PAIR_ADDR
        });
        group::first_lane(empty)
    }

    /// Extends `slab`'s chain by one freshly allocated slab: attempt the
    /// link CAS, detect a loss from its result, compensate by returning the
    /// untouched slab, and let the caller retry against whichever link ended
    /// up installed. Returns the linked successor, or `None` when the slab
    /// pool is exhausted and nobody else linked one either.
    fn try_extend_chain(&self, bucket: u32, slab: SlabAddr, lane_id: u32) -> Option<SlabAddr> {
        let fresh = self.slabs.group_allocate(lane_id);
        if fresh == EMPTY_SLAB_ADDR {
            // The chain may still have grown under us; report exhaustion only
            // when no link appeared.
            let next = self.unit(bucket, slab, NEXT_PTR_LANE).load(Ordering::Acquire);
            return (next != EMPTY_SLAB_ADDR).then_some(next);
        }
        match self.unit(bucket, slab, NEXT_PTR_LANE).compare_exchange(
            EMPTY_SLAB_ADDR,
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(fresh),
            Err(winner) => {
                self.slabs.free_untouched(fresh);
                Some(winner)
            }
        }
    }

    /// Insert protocol for one tile of up to [`GROUP_WIDTH`] queries.
    ///
    /// `keys` and `values` are the tile-local flat record arrays; `iters` and
    /// `masks` are the tile-local outputs, one element per lane. Duplicate
    /// keys and pool exhaustion resolve with a false mask; the stored value
    /// of an existing key is never updated (first writer wins).
    pub fn insert_tile(
        &self,
        keys: &[u8],
        values: &[u8],
        iters: &mut [PairAddr],
        masks: &mut [bool],
    ) {
        let count = masks.len();
        debug_assert!(count <= GROUP_WIDTH);
        debug_assert_eq!(iters.len(), count);
        debug_assert_eq!(keys.len(), count * self.key_size);
        debug_assert_eq!(values.len(), count * self.value_size);

        iters.fill(EMPTY_PAIR_ADDR);
        masks.fill(false);

        let mut bucket_ids = [0u32; GROUP_WIDTH];
        let mut prealloc = [EMPTY_PAIR_ADDR; GROUP_WIDTH];
        let mut active: LaneMask = 0;

        // Every pending lane speculatively allocates its pair and writes
        // key and value up front; publication happens through the slot CAS.
        for lane in 0..count {
            let key = &keys[lane * self.key_size..(lane + 1) * self.key_size];
            bucket_ids[lane] = self.compute_bucket(key);
            let addr = self.pairs.allocate(bucket_ids[lane] as usize);
            if addr == EMPTY_PAIR_ADDR {
                // Pair pool exhausted: this key reports a false mask, the
                // rest of the batch proceeds.
                continue;
            }
            let value = &values[lane * self.value_size..(lane + 1) * self.value_size];
            self.pairs.write_pair(addr, key, value);
            prealloc[lane] = addr;
            active |= 1 << lane;
        }

        let mut prev_queue: LaneMask = 0;
        let mut curr_slab = HEAD_SLAB_ADDR;
        let mut src_key = [0u8; MAX_KEY_BYTES];

        while active != 0 {
            let work_queue = active;
            // A freshly resolved source means the next pending lane restarts
            // its walk from the bucket head.
            if work_queue != prev_queue {
                curr_slab = HEAD_SLAB_ADDR;
            }
            let src_lane = work_queue.trailing_zeros();
            let src = src_lane as usize;
            let src_bucket = bucket_ids[src];
            Self::broadcast_key(&mut src_key, keys, self.key_size, src_lane);

            let units = self.read_units(src_bucket, curr_slab);

            if self.find_key_lane(&units, &src_key[..self.key_size]).is_some() {
                // Key already present: give the speculative pair back and
                // report "already exists".
                self.pairs.free(prealloc[src]);
                active &= !(1 << src_lane);
            } else if let Some(empty_lane) = Self::find_empty_lane(&units) {
                let slot = self.unit(src_bucket, curr_slab, empty_lane);
                if slot
                    .compare_exchange(
                        EMPTY_PAIR_ADDR,
                        prealloc[src],
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    iters[src] = prealloc[src];
                    masks[src] = true;
                    active &= !(1 << src_lane);
                }
                // CAS loss: a rival claimed the slot first. Rescan the same
                // slab; the next snapshot sees either the rival's key
                // (duplicate) or another empty slot.
            } else {
                let next = units[NEXT_PTR_LANE as usize];
                if next != EMPTY_SLAB_ADDR {
                    curr_slab = next;
                } else if self.try_extend_chain(src_bucket, curr_slab, src_lane).is_some() {
                    // Re-read the chain pointer next iteration and walk into
                    // whichever link got installed.
                } else {
                    // Slab pool exhausted with no link installed: resolve
                    // with a false mask and give the speculative pair back.
                    self.pairs.free(prealloc[src]);
                    active &= !(1 << src_lane);
                }
            }

            prev_queue = work_queue;
        }
    }

    /// Search protocol for one tile of up to [`GROUP_WIDTH`] queries.
    pub fn search_tile(&self, keys: &[u8], iters: &mut [PairAddr], masks: &mut [bool]) {
        let count = masks.len();
        debug_assert!(count <= GROUP_WIDTH);
        debug_assert_eq!(iters.len(), count);
        debug_assert_eq!(keys.len(), count * self.key_size);

        iters.fill(EMPTY_PAIR_ADDR);
        masks.fill(false);

        let mut bucket_ids = [0u32; GROUP_WIDTH];
        let mut active: LaneMask = 0;
        for lane in 0..count {
            let key = &keys[lane * self.key_size..(lane + 1) * self.key_size];
            bucket_ids[lane] = self.compute_bucket(key);
            active |= 1 << lane;
        }

        let mut prev_queue: LaneMask = 0;
        let mut curr_slab = HEAD_SLAB_ADDR;
        let mut src_key = [0u8; MAX_KEY_BYTES];

        while active != 0 {
            let work_queue = active;
            if work_queue != prev_queue {
                curr_slab = HEAD_SLAB_ADDR;
            }
            let src_lane = work_queue.trailing_zeros();
            let src = src_lane as usize;
            let src_bucket = bucket_ids[src];
            Self::broadcast_key(&mut src_key, keys, self.key_size, src_lane);

            let units = self.read_units(src_bucket, curr_slab);

            if let Some(found_lane) = self.find_key_lane(&units, &src_key[..self.key_size]) {
                // Broadcast the found unit back to the source lane.
                iters[src] = units[found_lane as usize];
                masks[src] = true;
                active &= !(1 << src_lane);
            } else {
                let next = units[NEXT_PTR_LANE as usize];
                if next == EMPTY_SLAB_ADDR {
                    // Chain exhausted: not found.
                    active &= !(1 << src_lane);
                } else {
                    curr_slab = next;
                }
            }

            prev_queue = work_queue;
        }
    }

    /// Remove protocol for one tile of up to [`GROUP_WIDTH`] queries.
    ///
    /// Success frees the pair back to the pair pool. A lost CAS means another
    /// lane already cleared or replaced the slot; that reads as "already
    /// removed" — idempotent, never a double free.
    pub fn remove_tile(&self, keys: &[u8], masks: &mut [bool]) {
        let count = masks.len();
        debug_assert!(count <= GROUP_WIDTH);
        debug_assert_eq!(keys.len(), count * self.key_size);

        masks.fill(false);

        let mut bucket_ids = [0u32; GROUP_WIDTH];
        let mut active: LaneMask = 0;
        for lane in 0..count {
            let key = &keys[lane * self.key_size..(lane + 1) * self.key_size];
            bucket_ids[lane] = self.compute_bucket(key);
            active |= 1 << lane;
        }

        let mut prev_queue: LaneMask = 0;
        let mut curr_slab = HEAD_SLAB_ADDR;
        let mut src_key = [0u8; MAX_KEY_BYTES];

        while active != 0 {
            let work_queue = active;
            if work_queue != prev_queue {
                curr_slab = HEAD_SLAB_ADDR;
            }
            let src_lane = work_queue.trailing_zeros();
            let src = src_lane as usize;
            let src_bucket = bucket_ids[src];
            Self::broadcast_key(&mut src_key, keys, self.key_size, src_lane);

            let units = self.read_units(src_bucket, curr_slab);

            if let Some(found_lane) = self.find_key_lane(&units, &src_key[..self.key_size]) {
                let victim = units[found_lane as usize];
                let slot = self.unit(src_bucket, curr_slab, found_lane);
                // CAS from the snapshot value so a win proves this lane is
                // the one that cleared exactly that pair.
                if slot
                    .compare_exchange(victim, EMPTY_PAIR_ADDR, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    self.pairs.free(victim);
                    masks[src] = true;
                }
                active &= !(1 << src_lane);
            } else {
                let next = units[NEXT_PTR_LANE as usize];
                if next == EMPTY_SLAB_ADDR {
                    active &= !(1 << src_lane);
                } else {
                    curr_slab = next;
                }
            }

            prev_queue = work_queue;
        }
    }

    /// Live-pair count across one bucket's whole chain.
    pub fn count_bucket(&self, bucket: u32) -> u32 {
        let mut count = 0;
        let mut slab = HEAD_SLAB_ADDR;
        loop {
            let units = self.read_units(bucket, slab);
            let live = group::ballot(|lane| {
                (1 << lane) & DATA_LANES_MASK != 0 && units[lane as usize] != EMPTY_PAIR_ADDR
            });
            count += live.count_ones();
            let next = units[NEXT_PTR_LANE as usize];
            if next == EMPTY_SLAB_ADDR {
                return count;
            }
            slab = next;
        }
    }

    /// Walks one bucket and writes every live pair address into a
    /// collision-free range of `out`: ballot ranks order the lanes within a
    /// slab, and a single fetch-add on `cursor` reserves the slab's range.
    pub fn collect_bucket(&self, bucket: u32, out: &[AtomicU32], cursor: &AtomicUsize) {
        let mut slab = HEAD_SLAB_ADDR;
        loop {
            let units = self.read_units(bucket, slab);
            let live: LaneMask = group::ballot(|lane| {
                (1 << lane) & DATA_LANES_MASK != 0 && units[lane as usize] != EMPTY_PAIR_ADDR
            });
            if live != 0 {
                let base = cursor.fetch_add(live.count_ones() as usize, Ordering::Relaxed);
                for lane in 0..NEXT_PTR_LANE {
                    if live & (1 << lane) != 0 {
                        let rank = (live & group::lanes_below(lane)).count_ones() as usize;
                        out[base + rank].store(units[lane as usize], Ordering::Relaxed);
                    }
                }
            }
            let next = units[NEXT_PTR_LANE as usize];
            if next == EMPTY_SLAB_ADDR {
                return;
            }
            slab = next;
        }
    }
}
