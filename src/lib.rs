//! Lock-free, fixed-capacity slab hash store with cooperative-group batch
//! operations.
//!
//! The store maps fixed-size opaque keys to fixed-size opaque values. All
//! storage is pre-sized at construction: a bucket table of head slabs, a
//! slab pool for bucket-chain overflow, and a pair pool of key+value blocks.
//! Addresses are `u32` handles into those pools, never pointers.
//!
//! Operations are batched. A batch is tiled into cooperative groups of
//! [`GROUP_WIDTH`] lanes; each group walks one bucket chain at a time using
//! group voting and broadcast, and every cross-group interaction is a
//! per-slot compare-and-swap. There are no locks and nothing blocks: a
//! query either resolves or reaches the end of a finite chain before
//! extending it.
//!
//! On an accelerator this protocol runs on hardware lock-step lane groups;
//! here a group is a software tile advanced by one worker of a [`Device`]
//! pool, which preserves the protocol's correctness and trades only the
//! performance characteristic.
//!
//! ```
//! use slab_hash::{Device, SlabHashMap};
//!
//! # fn main() -> slab_hash::Result<()> {
//! let device = Device::with_threads(2)?;
//! let mut map = SlabHashMap::new(64, 128, 4, 8, device)?;
//!
//! let keys: Vec<u8> = [1u32, 2, 3].iter().flat_map(|k| k.to_le_bytes()).collect();
//! let values: Vec<u8> = [10u64, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();
//!
//! let (iters, masks) = map.insert(&keys, &values)?;
//! assert!(masks.iter().all(|&m| m));
//!
//! let (found, hits) = map.search(&keys)?;
//! assert_eq!(found, iters);
//! assert!(hits.iter().all(|&m| m));
//!
//! let (_, values_back) = map.extract(&found)?;
//! assert_eq!(values_back, values);
//! # Ok(())
//! # }
//! ```

mod bitmap;
mod context;
mod pair_pool;
mod slab_pool;

pub mod device;
pub mod error;
pub mod group;
pub mod hash;
pub mod map;
pub mod slab;

pub use device::Device;
pub use error::{Result, SlabHashError};
pub use group::GROUP_WIDTH;
pub use hash::{Fnv1aHash, IdentityHash, KeyHash};
pub use map::SlabHashMap;
pub use slab::{PairAddr, EMPTY_PAIR_ADDR, MAX_KEY_BYTES};
