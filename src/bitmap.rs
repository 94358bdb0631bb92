//! Lock-free free-index bitmap backing both fixed pools.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

const WORD_BITS: usize = 32;

/// Membership bitmap over a fixed range of pool indices.
///
/// A set bit marks a free index; claiming clears the bit with a CAS,
/// releasing sets it again with a fetch-or. Because the managed objects are
/// plain indices, re-claiming a released index is indistinguishable from
/// claiming it the first time, so the scheme has no ABA hazard.
///
/// A rotating cursor combined with a caller-provided hint spreads scan start
/// positions so concurrent claimers do not pile onto the same word.
pub(crate) struct FreeBitmap {
    words: Box<[AtomicU32]>,
    capacity: usize,
    cursor: AtomicUsize,
}

impl FreeBitmap {
    pub fn new(capacity: usize) -> Self {
        let num_words = capacity.div_ceil(WORD_BITS);
        let words = (0..num_words).map(|w| AtomicU32::new(Self::full_word(capacity, w))).collect();
        Self {
            words,
            capacity,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Bit pattern of word `w` with every in-range index free. The tail word
    /// keeps out-of-range bits permanently clear.
    fn full_word(capacity: usize, w: usize) -> u32 {
        let valid = (capacity - w * WORD_BITS).min(WORD_BITS);
        if valid == WORD_BITS {
            u32::MAX
        } else {
            (1u32 << valid) - 1
        }
    }

    /// Claims any free index, scanning from a position derived from `hint`.
    /// Returns `None` when the pool is exhausted.
    pub fn acquire(&self, hint: usize) -> Option<usize> {
        if self.words.is_empty() {
            return None;
        }
        let start = (self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(hint)) % self.words.len();
        for i in 0..self.words.len() {
            let w = (start + i) % self.words.len();
            let word = &self.words[w];
            let mut bits = word.load(Ordering::Relaxed);
            while bits != 0 {
                let bit = bits.trailing_zeros();
                match word.compare_exchange_weak(
                    bits,
                    bits & !(1 << bit),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(w * WORD_BITS + bit as usize),
                    Err(current) => bits = current,
                }
            }
        }
        None
    }

    /// Returns `index` to the pool. An index must be released at most once
    /// per acquisition.
    pub fn release(&self, index: usize) {
        debug_assert!(index < self.capacity);
        let bit = 1u32 << (index % WORD_BITS);
        let prev = self.words[index / WORD_BITS].fetch_or(bit, Ordering::AcqRel);
        debug_assert_eq!(prev & bit, 0, "double release of pool index {index}");
    }

    /// Number of currently claimed indices.
    pub fn in_use(&self) -> usize {
        let free: usize = self
            .words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum();
        self.capacity - free
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks every index free again.
    pub fn reset(&self) {
        for (w, word) in self.words.iter().enumerate() {
            word.store(Self::full_word(self.capacity, w), Ordering::Relaxed);
        }
    }
}
