//! Completion signal recycling.
//!
//! Signals are allocated at a high rate under load, so completed ones
//! are reset and reused instead of freed. Recycling only succeeds for
//! a uniquely owned signal; a signal somebody still holds a handle to
//! is simply dropped and the pool takes the miss.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::lockfree::LockFreeStack;
use crate::signal::{CompletionSignal, SignalRef};

/// Default number of signals the pool will hold on to.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Counters describing pool effectiveness.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Acquisitions served from the pool.
    pub hits: usize,
    /// Acquisitions that had to allocate.
    pub misses: usize,
    /// Recycle attempts refused because the signal was still shared
    /// or the pool was full.
    pub rejected: usize,
}

/// A lock-free pool of reusable completion signals.
pub struct SignalPool {
    free: LockFreeStack<SignalRef>,
    available: AtomicUsize,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    rejected: AtomicUsize,
}

impl SignalPool {
    /// Create a pool with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool that holds at most `capacity` idle signals.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: LockFreeStack::new(),
            available: AtomicUsize::new(0),
            capacity,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Take a fresh signal, reusing a recycled one when possible.
    ///
    /// Returned signals are always open, not complete, and have no
    /// registered waiters.
    pub fn acquire(&self) -> SignalRef {
        if let Some(signal) = self.free.pop() {
            self.available.fetch_sub(1, Ordering::Relaxed);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return signal;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        CompletionSignal::new()
    }

    /// Offer a signal back to the pool.
    ///
    /// Succeeds only when this is the last handle, the signal has
    /// completed, and the pool has room. Returns whether the signal
    /// was pooled.
    pub fn recycle(&self, signal: SignalRef) -> bool {
        if !signal.is_complete() || self.available.load(Ordering::Relaxed) >= self.capacity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match Arc::try_unwrap(signal) {
            Ok(mut inner) => {
                inner.reset();
                self.free.push(Arc::new(inner));
                self.available.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_still_shared) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for SignalPool {
    fn default() -> Self {
        Self::new()
    }
}
