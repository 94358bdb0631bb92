//! Execution target for batched operations.

use std::fmt;

use crate::error::Result;

/// A CPU execution target: a fixed pool of workers, each advancing one
/// cooperative group at a time.
///
/// The device is chosen at store construction and every batch runs to
/// completion on it before the call returns; there is no overlap between
/// batches and no cancellation. A panic inside a batch (a "device fault")
/// propagates out of the batch call and leaves that batch's outputs
/// undefined.
pub struct Device {
    pool: rayon::ThreadPool,
}

impl Device {
    /// Device with one worker per available CPU.
    pub fn cpu() -> Result<Self> {
        let threads = std::thread::available_parallelism().map(usize::from).unwrap_or(1);
        Self::with_threads(threads)
    }

    /// Device with an explicit worker count.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("slab-hash-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Number of workers, i.e. how many groups can be in flight at once.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op` to completion inside the worker pool.
    pub(crate) fn run<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("workers", &self.workers()).finish()
    }
}
