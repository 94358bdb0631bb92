//! Pair allocator: a fixed pool of key+value blocks addressed by handle.
//!
//! Every block is `key_size + value_size` bytes, key first, value
//! immediately after, no padding, no header. Blocks are claimed and released
//! through a lock-free bitmap; exhaustion is a reported condition, not a
//! crash.

use std::cell::UnsafeCell;

use crate::bitmap::FreeBitmap;
use crate::slab::{PairAddr, EMPTY_PAIR_ADDR};

pub(crate) struct PairPool {
    arena: Box<[UnsafeCell<u8>]>,
    bitmap: FreeBitmap,
    key_size: usize,
    value_size: usize,
}

// SAFETY: the arena is plain bytes behind `UnsafeCell`. Block bytes are
// written only by `write_pair` on a freshly allocated address that no slot
// references yet, and read only for addresses observed in a published slot
// (an acquire load of a slot a release CAS installed the address into) or
// handed back by such a read. Mutating batches take `&mut` on the host
// store, so an allocation-phase batch and a free-phase batch never overlap,
// and within one batch no block is rewritten while readable. Under that
// protocol concurrent access to any given byte is read-only.
unsafe impl Sync for PairPool {}
unsafe impl Send for PairPool {}

impl PairPool {
    pub fn new(capacity: usize, key_size: usize, value_size: usize) -> Self {
        let arena = (0..capacity * (key_size + value_size))
            .map(|_| UnsafeCell::new(0))
            .collect();
        Self {
            arena,
            bitmap: FreeBitmap::new(capacity),
            key_size,
            value_size,
        }
    }

    #[inline]
    fn pair_size(&self) -> usize {
        self.key_size + self.value_size
    }

    /// Claims a block; [`EMPTY_PAIR_ADDR`] when the pool is exhausted.
    /// `hint` spreads concurrent claimers across the bitmap.
    pub fn allocate(&self, hint: usize) -> PairAddr {
        match self.bitmap.acquire(hint) {
            Some(index) => index as PairAddr,
            None => EMPTY_PAIR_ADDR,
        }
    }

    /// Returns a block to the pool. Each address is freed at most once per
    /// allocation; the walking protocol guarantees this by resolving a lane
    /// before any second free could occur.
    pub fn free(&self, addr: PairAddr) {
        self.bitmap.release(addr as usize);
    }

    /// Writes `key` then `value` contiguously into the block at `addr`.
    ///
    /// Called only by the allocating lane between `allocate` and the slot
    /// CAS that publishes `addr`; nothing else can reference the block yet.
    pub fn write_pair(&self, addr: PairAddr, key: &[u8], value: &[u8]) {
        debug_assert_eq!(key.len(), self.key_size);
        debug_assert_eq!(value.len(), self.value_size);
        let base = addr as usize * self.pair_size();
        // SAFETY: `addr` came from `allocate` and is exclusively owned by the
        // writing lane until published (see type-level comment), the arena
        // slice is contiguous, and `base + pair_size` is in bounds for every
        // address the bitmap hands out.
        unsafe {
            let dst = self.arena[base].get();
            std::ptr::copy_nonoverlapping(key.as_ptr(), dst, self.key_size);
            std::ptr::copy_nonoverlapping(value.as_ptr(), dst.add(self.key_size), self.value_size);
        }
    }

    /// Whether the key bytes stored at `addr` equal `key`.
    pub fn key_equals(&self, addr: PairAddr, key: &[u8]) -> bool {
        debug_assert_eq!(key.len(), self.key_size);
        let base = addr as usize * self.pair_size();
        // SAFETY: `addr` was observed in a published slot, so its bytes were
        // fully written before the publishing release-CAS and are stable for
        // the duration of the batch (see type-level comment).
        unsafe {
            let stored = std::slice::from_raw_parts(self.arena[base].get() as *const u8, self.key_size);
            stored == key
        }
    }

    /// Copies the key and value bytes at `addr` into the output buffers.
    pub fn read_pair(&self, addr: PairAddr, key_out: &mut [u8], value_out: &mut [u8]) {
        debug_assert_eq!(key_out.len(), self.key_size);
        debug_assert_eq!(value_out.len(), self.value_size);
        let base = addr as usize * self.pair_size();
        // SAFETY: same publication argument as `key_equals`; source and
        // destination never overlap because the outputs are caller-owned
        // host buffers.
        unsafe {
            let src = self.arena[base].get() as *const u8;
            std::ptr::copy_nonoverlapping(src, key_out.as_mut_ptr(), self.key_size);
            std::ptr::copy_nonoverlapping(src.add(self.key_size), value_out.as_mut_ptr(), self.value_size);
        }
    }

    pub fn capacity(&self) -> usize {
        self.bitmap.capacity()
    }

    /// Number of live (claimed) pairs.
    pub fn live(&self) -> usize {
        self.bitmap.in_use()
    }

    pub fn reset(&self) {
        self.bitmap.reset();
    }
}
