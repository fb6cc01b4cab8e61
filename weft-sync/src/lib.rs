//! Synchronization primitives for the weft task graph.
//!
//! The stall/wake machinery of the worker pool is built on one small
//! piece: a manual-reset event.

#![warn(missing_docs)]

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A manual-reset event.
///
/// `wait` blocks until some thread calls `trigger`. Once triggered the
/// event stays signaled until `reset` is called, so a trigger that
/// races ahead of the waiter is never lost. This is the stall/wake
/// primitive used by worker threads and by blocking waits on
/// completion signals.
pub struct ManualResetEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl ManualResetEvent {
    /// Create a new event in the non-signaled state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Signal the event, waking every current and future waiter.
    pub fn trigger(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = true;
        drop(signaled);
        self.condvar.notify_all();
    }

    /// Return the event to the non-signaled state.
    pub fn reset(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = false;
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        while !*signaled {
            signaled = self
                .condvar
                .wait(signaled)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until the event is signaled or the timeout elapses.
    ///
    /// Returns `true` if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = std::time::Instant::now() + timeout;
        while !*signaled {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _result) = self
                .condvar
                .wait_timeout(signaled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            signaled = guard;
        }
        true
    }

    /// Whether the event is currently signaled.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new()
    }
}
