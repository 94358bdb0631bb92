//! Error types.
//!
//! Errors cover construction and batch-shape problems only. Per-key
//! conditions — pool exhaustion, duplicate keys, removal of an absent key —
//! are reported through the per-key mask of the batch result, never as an
//! `Err` (a partial batch is a defined outcome, not a failure).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlabHashError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SlabHashError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Key sizes must be non-zero multiples of 4 bytes, at most 32: the hash
    /// mixes 4-byte chunks and slabs cache one broadcast key per step.
    #[error("key size {0} must be a non-zero multiple of 4 bytes, at most 32")]
    InvalidKeySize(usize),

    #[error("batch of {len} bytes is not a multiple of the {record}-byte record size")]
    RaggedBatch { len: usize, record: usize },

    #[error("value batch of {value_bytes} bytes does not match {keys} keys of {value_size}-byte values")]
    ValueBatchMismatch {
        keys: usize,
        value_bytes: usize,
        value_size: usize,
    },

    #[error("iterator {addr:#010x} at index {index} does not reference a pair slot")]
    InvalidIterator { index: usize, addr: u32 },

    #[error("failed to build device worker pool: {0}")]
    DeviceBuild(#[from] rayon::ThreadPoolBuildError),
}
