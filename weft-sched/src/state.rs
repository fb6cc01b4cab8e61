//! Packed per-tier worker state.
//!
//! One atomic 32-bit word tracks every worker in a tier: a stalled
//! bit and a working bit per worker, 13 of each. Packing both sets
//! into one word lets stall, wake, and anti-starvation decisions
//! commit in a single compare-exchange, which is what makes the fast
//! dispatch mode coherent without a lock.

use std::sync::atomic::{AtomicU32, Ordering};

use weft_core::MAX_TIER_WORKERS;

const FIELD_MASK: u32 = (1 << MAX_TIER_WORKERS) - 1;
const WORKING_SHIFT: u32 = MAX_TIER_WORKERS as u32;

/// An immutable snapshot of a tier's worker state.
///
/// All mutations produce a new snapshot; [`WorkerStateMask`] commits
/// a snapshot transition atomically or reports the fresher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierState {
    bits: u32,
}

impl TierState {
    /// The state with no worker stalled or working.
    #[must_use]
    pub fn empty() -> Self {
        Self { bits: 0 }
    }

    fn stalled_bits(self) -> u32 {
        self.bits & FIELD_MASK
    }

    fn working_bits(self) -> u32 {
        (self.bits >> WORKING_SHIFT) & FIELD_MASK
    }

    /// Whether `worker` is marked stalled.
    #[must_use]
    pub fn is_stalled(self, worker: usize) -> bool {
        debug_assert!(worker < MAX_TIER_WORKERS);
        self.stalled_bits() & (1 << worker) != 0
    }

    /// Whether `worker` is marked working.
    #[must_use]
    pub fn is_working(self, worker: usize) -> bool {
        debug_assert!(worker < MAX_TIER_WORKERS);
        self.working_bits() & (1 << worker) != 0
    }

    /// Mark `worker` stalled. The worker must not be marked working.
    #[must_use]
    pub fn with_stalled(self, worker: usize) -> Self {
        debug_assert!(worker < MAX_TIER_WORKERS);
        debug_assert!(!self.is_working(worker), "worker stalled while working");
        Self {
            bits: self.bits | (1 << worker),
        }
    }

    /// Clear `worker`'s stalled bit.
    #[must_use]
    pub fn without_stalled(self, worker: usize) -> Self {
        debug_assert!(worker < MAX_TIER_WORKERS);
        Self {
            bits: self.bits & !(1 << worker),
        }
    }

    /// Mark `worker` working. The worker must not be marked stalled.
    #[must_use]
    pub fn with_working(self, worker: usize) -> Self {
        debug_assert!(worker < MAX_TIER_WORKERS);
        debug_assert!(!self.is_stalled(worker), "worker working while stalled");
        Self {
            bits: self.bits | (1 << (worker as u32 + WORKING_SHIFT)),
        }
    }

    /// Clear `worker`'s working bit.
    #[must_use]
    pub fn without_working(self, worker: usize) -> Self {
        debug_assert!(worker < MAX_TIER_WORKERS);
        Self {
            bits: self.bits & !(1 << (worker as u32 + WORKING_SHIFT)),
        }
    }

    /// Number of stalled workers.
    #[must_use]
    pub fn stalled_count(self) -> usize {
        self.stalled_bits().count_ones() as usize
    }

    /// Number of working workers.
    #[must_use]
    pub fn working_count(self) -> usize {
        self.working_bits().count_ones() as usize
    }

    /// The highest-index stalled worker, if any. The fast scheduler
    /// always wakes the highest index so low-index workers settle
    /// into long stalls.
    #[must_use]
    pub fn highest_stalled(self) -> Option<usize> {
        let stalled = self.stalled_bits();
        if stalled == 0 {
            None
        } else {
            Some(31 - stalled.leading_zeros() as usize)
        }
    }
}

/// The shared atomic word holding a [`TierState`].
pub struct WorkerStateMask {
    bits: AtomicU32,
}

impl WorkerStateMask {
    /// Create a mask with no worker stalled or working.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> TierState {
        TierState {
            bits: self.bits.load(Ordering::Acquire),
        }
    }

    /// Attempt to move from `current` to `new`. On failure returns
    /// the state that was actually present.
    pub fn compare_exchange(&self, current: TierState, new: TierState) -> Result<(), TierState> {
        self.bits
            .compare_exchange(current.bits, new.bits, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|bits| TierState { bits })
    }
}

impl Default for WorkerStateMask {
    fn default() -> Self {
        Self::new()
    }
}
