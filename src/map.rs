//! Host store: owns the bucket table, both pools and the device, and
//! dispatches batched operations across cooperative groups.
//!
//! Every batched call distributes its `N` queries over `ceil(N / 32)` groups
//! on the device's worker pool and returns only once all groups are done;
//! batches on the same store never overlap. Mutating batches take
//! `&mut self`, which encodes that contract in the borrow checker; read-only
//! batches take `&self`.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::context::SlabHashContext;
use crate::device::Device;
use crate::error::{Result, SlabHashError};
use crate::group::GROUP_WIDTH;
use crate::hash::{Fnv1aHash, KeyHash};
use crate::pair_pool::PairPool;
use crate::slab::{BucketTable, PairAddr, EMPTY_PAIR_ADDR, HEAD_SLAB_ADDR, MAX_KEY_BYTES, SLAB_DATA_SLOTS};
use crate::slab_pool::SlabPool;

/// Lock-free, fixed-capacity hash store over opaque fixed-size keys and
/// values.
///
/// Capacities, record sizes and the execution device are fixed at
/// construction; there is no resizing and no rehashing. Batch inputs and
/// outputs are flat byte arrays with one fixed-size record per key or value,
/// no encoding, no padding.
///
/// Per-key outcomes (duplicate key, pool exhaustion, absent key) surface as
/// mask bits in the batch result. `Err` is reserved for malformed calls and
/// construction problems; a panic out of a batch is a device fault and
/// leaves that batch's outputs undefined.
pub struct SlabHashMap<H: KeyHash = Fnv1aHash> {
    buckets: BucketTable,
    slabs: SlabPool,
    pairs: PairPool,
    hasher: H,
    key_size: usize,
    value_size: usize,
    device: Device,
}

impl SlabHashMap<Fnv1aHash> {
    /// Store with the default FNV-1a chunk hash, seeded by the key size.
    ///
    /// # Arguments
    /// * `max_buckets` - Number of buckets; fixed for the store's lifetime
    /// * `max_pairs` - Pair pool capacity (upper bound on live pairs)
    /// * `key_size` - Key bytes per record; non-zero multiple of 4, at most 32
    /// * `value_size` - Value bytes per record; non-zero
    /// * `device` - Execution target for every batch on this store
    pub fn new(
        max_buckets: u32,
        max_pairs: u32,
        key_size: usize,
        value_size: usize,
        device: Device,
    ) -> Result<Self> {
        let hasher = Fnv1aHash::new(key_size);
        Self::with_hasher(max_buckets, max_pairs, key_size, value_size, device, hasher)
    }
}

impl<H: KeyHash> SlabHashMap<H> {
    /// Store with a caller-provided hash function.
    pub fn with_hasher(
        max_buckets: u32,
        max_pairs: u32,
        key_size: usize,
        value_size: usize,
        device: Device,
        hasher: H,
    ) -> Result<Self> {
        if max_buckets == 0 {
            return Err(SlabHashError::InvalidConfig("max_buckets must be non-zero"));
        }
        if max_pairs == 0 {
            return Err(SlabHashError::InvalidConfig("max_pairs must be non-zero"));
        }
        if max_pairs >= HEAD_SLAB_ADDR {
            return Err(SlabHashError::InvalidConfig(
                "max_pairs must stay below the internal address sentinels",
            ));
        }
        if key_size == 0 || key_size % 4 != 0 || key_size > MAX_KEY_BYTES {
            return Err(SlabHashError::InvalidKeySize(key_size));
        }
        if value_size == 0 {
            return Err(SlabHashError::InvalidConfig("value_size must be non-zero"));
        }

        // A chain only grows once every data slot before it is occupied, so
        // ceil(max_pairs / 31) covers any reachable chain population; the
        // slack covers one in-flight speculative slab per concurrent group.
        let max_slabs = (max_pairs as usize).div_ceil(SLAB_DATA_SLOTS) + device.workers();

        let store = Self {
            buckets: BucketTable::new(max_buckets),
            slabs: SlabPool::new(max_slabs),
            pairs: PairPool::new(max_pairs as usize, key_size, value_size),
            hasher,
            key_size,
            value_size,
            device,
        };
        debug!(
            max_buckets,
            max_pairs,
            key_size,
            value_size,
            max_slabs,
            workers = store.device.workers(),
            "slab hash store created"
        );
        Ok(store)
    }

    fn context(&self) -> SlabHashContext<'_, H> {
        SlabHashContext {
            buckets: &self.buckets,
            slabs: &self.slabs,
            pairs: &self.pairs,
            hasher: self.hasher,
            key_size: self.key_size,
            value_size: self.value_size,
        }
    }

    fn key_count(&self, keys: &[u8]) -> Result<usize> {
        if keys.len() % self.key_size != 0 {
            return Err(SlabHashError::RaggedBatch {
                len: keys.len(),
                record: self.key_size,
            });
        }
        Ok(keys.len() / self.key_size)
    }

    /// Batched insert of `N` key/value records.
    ///
    /// Returns one iterator and one mask per key. A true mask means the pair
    /// was inserted and the iterator references it. A false mask means
    /// "already exists" (the stored value is left untouched — first writer
    /// wins) or pool exhaustion for that key; the rest of the batch is
    /// unaffected.
    pub fn insert(&mut self, keys: &[u8], values: &[u8]) -> Result<(Vec<PairAddr>, Vec<bool>)> {
        let num_keys = self.key_count(keys)?;
        if values.len() != num_keys * self.value_size {
            return Err(SlabHashError::ValueBatchMismatch {
                keys: num_keys,
                value_bytes: values.len(),
                value_size: self.value_size,
            });
        }

        let mut iters = vec![EMPTY_PAIR_ADDR; num_keys];
        let mut masks = vec![false; num_keys];
        if num_keys == 0 {
            return Ok((iters, masks));
        }

        let ctx = self.context();
        let (key_size, value_size) = (self.key_size, self.value_size);
        self.device.run(|| {
            iters
                .par_chunks_mut(GROUP_WIDTH)
                .zip(masks.par_chunks_mut(GROUP_WIDTH))
                .enumerate()
                .for_each(|(tile, (tile_iters, tile_masks))| {
                    let base = tile * GROUP_WIDTH;
                    let count = tile_masks.len();
                    ctx.insert_tile(
                        &keys[base * key_size..(base + count) * key_size],
                        &values[base * value_size..(base + count) * value_size],
                        tile_iters,
                        tile_masks,
                    );
                });
        });

        let inserted = masks.iter().filter(|&&m| m).count();
        if inserted < num_keys && self.pairs.live() == self.pairs.capacity() {
            warn!(
                rejected = num_keys - inserted,
                capacity = self.pairs.capacity(),
                "pair pool exhausted during insert batch"
            );
        }
        trace!(num_keys, inserted, "insert batch complete");
        Ok((iters, masks))
    }

    /// Batched search of `N` keys.
    ///
    /// Returns one iterator and one mask per key; a false mask means the key
    /// is absent and its iterator is the null address.
    pub fn search(&self, keys: &[u8]) -> Result<(Vec<PairAddr>, Vec<bool>)> {
        let num_keys = self.key_count(keys)?;
        let mut iters = vec![EMPTY_PAIR_ADDR; num_keys];
        let mut masks = vec![false; num_keys];
        if num_keys == 0 {
            return Ok((iters, masks));
        }

        let ctx = self.context();
        let key_size = self.key_size;
        self.device.run(|| {
            iters
                .par_chunks_mut(GROUP_WIDTH)
                .zip(masks.par_chunks_mut(GROUP_WIDTH))
                .enumerate()
                .for_each(|(tile, (tile_iters, tile_masks))| {
                    let base = tile * GROUP_WIDTH;
                    let count = tile_masks.len();
                    ctx.search_tile(
                        &keys[base * key_size..(base + count) * key_size],
                        tile_iters,
                        tile_masks,
                    );
                });
        });

        let found = masks.iter().filter(|&&m| m).count();
        trace!(num_keys, found, "search batch complete");
        Ok((iters, masks))
    }

    /// Batched removal of `N` keys.
    ///
    /// A true mask means this call removed the pair and returned it to the
    /// pair pool. Removing an absent (or already-removed) key is a no-op
    /// with a false mask.
    pub fn remove(&mut self, keys: &[u8]) -> Result<Vec<bool>> {
        let num_keys = self.key_count(keys)?;
        let mut masks = vec![false; num_keys];
        if num_keys == 0 {
            return Ok(masks);
        }

        let ctx = self.context();
        let key_size = self.key_size;
        self.device.run(|| {
            masks
                .par_chunks_mut(GROUP_WIDTH)
                .enumerate()
                .for_each(|(tile, tile_masks)| {
                    let base = tile * GROUP_WIDTH;
                    let count = tile_masks.len();
                    ctx.remove_tile(
                        &keys[base * key_size..(base + count) * key_size],
                        tile_masks,
                    );
                });
        });

        let removed = masks.iter().filter(|&&m| m).count();
        trace!(num_keys, removed, "remove batch complete");
        Ok(masks)
    }

    /// Collects an iterator for every live pair, one group per bucket.
    ///
    /// Ballot plus prefix-count ranks give each live pair a collision-free
    /// output slot through a single shared cursor; no lock anywhere. The
    /// result order is unspecified.
    pub fn enumerate_all(&self) -> Vec<PairAddr> {
        let ctx = self.context();
        let out: Vec<AtomicU32> = (0..self.pairs.capacity())
            .map(|_| AtomicU32::new(EMPTY_PAIR_ADDR))
            .collect();
        let cursor = AtomicUsize::new(0);
        self.device.run(|| {
            (0..self.buckets.num_buckets())
                .into_par_iter()
                .for_each(|bucket| ctx.collect_bucket(bucket, &out, &cursor));
        });
        let len = cursor.into_inner().min(out.len());
        out[..len].iter().map(|addr| addr.load(Ordering::Relaxed)).collect()
    }

    /// Gathers the key and value bytes behind each iterator into flat
    /// host buffers laid out like batch inputs.
    ///
    /// Iterators must come from a search/insert/enumeration on this store
    /// with no intervening mutation; an out-of-range address (including the
    /// null iterator) fails the whole call.
    pub fn extract(&self, iterators: &[PairAddr]) -> Result<(Vec<u8>, Vec<u8>)> {
        for (index, &addr) in iterators.iter().enumerate() {
            if addr as usize >= self.pairs.capacity() {
                return Err(SlabHashError::InvalidIterator { index, addr });
            }
        }

        let mut keys = vec![0u8; iterators.len() * self.key_size];
        let mut values = vec![0u8; iterators.len() * self.value_size];
        if iterators.is_empty() {
            return Ok((keys, values));
        }

        let pairs = &self.pairs;
        self.device.run(|| {
            keys.par_chunks_mut(self.key_size)
                .zip(values.par_chunks_mut(self.value_size))
                .zip(iterators.par_iter())
                .for_each(|((key_out, value_out), &addr)| {
                    pairs.read_pair(addr, key_out, value_out);
                });
        });
        Ok((keys, values))
    }

    /// Live-pair count per bucket, walking every chain. Diagnostics.
    pub fn count_per_bucket(&self) -> Vec<u32> {
        let ctx = self.context();
        self.device.run(|| {
            (0..self.buckets.num_buckets())
                .into_par_iter()
                .map(|bucket| ctx.count_bucket(bucket))
                .collect()
        })
    }

    /// Live pairs over the data-slot capacity of all currently allocated
    /// slabs, bucket heads included. Always in `[0, 1]`.
    pub fn load_factor(&self) -> f64 {
        let live: u64 = self.count_per_bucket().iter().map(|&c| u64::from(c)).sum();
        let slabs = self.buckets.num_buckets() as usize + self.slabs.allocated();
        live as f64 / (slabs * SLAB_DATA_SLOTS) as f64
    }

    /// Resets the store to empty: every bucket head, slab and pair returns
    /// to its initial state. Chains never shrink during operation; this is
    /// the whole-store teardown path short of dropping the store.
    pub fn clear(&mut self) {
        self.buckets.reset();
        self.slabs.reset();
        self.pairs.reset();
        debug!("store cleared");
    }

    /// Number of live pairs.
    pub fn len(&self) -> usize {
        self.pairs.live()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_buckets(&self) -> u32 {
        self.buckets.num_buckets()
    }

    /// Pair pool capacity: the maximum number of live pairs.
    pub fn pair_capacity(&self) -> usize {
        self.pairs.capacity()
    }

    /// Overflow slab pool capacity (bucket heads not included).
    pub fn slab_capacity(&self) -> usize {
        self.slabs.capacity()
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}
