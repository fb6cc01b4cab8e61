//! Completion signals.
//!
//! A [`CompletionSignal`] is the handle other work hangs off: a
//! closeable lock-free list of waiters, a completed flag, and a
//! gather list for completions that have been deferred with
//! `dont_complete_until`. A signal closes exactly once; every waiter
//! is either captured by the close and notified, or refused by the
//! already-closed list and counts itself down immediately.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::lockfree::ClosableList;
use crate::task::{submit_with_prerequisites, ClosureTask, Dispatcher, PendingTask, TaskNode};
use crate::{TaskPriority, ThreadTarget, ThreadTier};

/// Shared handle to a completion signal.
pub type SignalRef = Arc<CompletionSignal>;

/// The completion side of a tracked work item.
pub struct CompletionSignal {
    subsequents: ClosableList<Arc<PendingTask>>,
    complete: AtomicBool,
    gather: Mutex<Vec<SignalRef>>,
}

impl CompletionSignal {
    /// Create a fresh, open signal.
    #[must_use]
    pub fn new() -> SignalRef {
        Arc::new(Self {
            subsequents: ClosableList::new_open(),
            complete: AtomicBool::new(false),
            gather: Mutex::new(Vec::new()),
        })
    }

    /// Whether the signal has completed.
    ///
    /// Once true it stays true until the signal is recycled. A waiter
    /// captured before the close always observes `true` by the time
    /// it runs.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Register a waiter. Returns `false` if the signal already
    /// closed, in which case the caller counts the waiter down itself.
    pub fn add_subsequent(&self, waiter: Arc<PendingTask>) -> bool {
        self.subsequents.push_if_open(waiter).is_ok()
    }

    /// Defer this signal's close until `child` completes.
    ///
    /// Only the task that owns this signal may call this, while it is
    /// running. Deferring an already completed signal is a programmer
    /// error.
    pub fn defer_completion(&self, child: SignalRef) {
        assert!(
            !self.is_complete(),
            "completion deferred on an already completed signal"
        );
        self.gather
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
    }

    /// Close the signal and notify every waiter.
    ///
    /// If completions were deferred, the gather list is exchanged out
    /// and a high-priority any-thread null task carrying this same
    /// signal is submitted, gated on the deferred signals; when it
    /// runs, this dispatch happens again with an empty gather list.
    /// Otherwise the completed flag is published, the waiter list is
    /// drained-and-closed, and each captured waiter counts down.
    pub fn dispatch_subsequents(signal: &SignalRef, dispatcher: &dyn Dispatcher) {
        let gathered =
            mem::take(&mut *signal.gather.lock().unwrap_or_else(|e| e.into_inner()));
        if !gathered.is_empty() {
            let hop = TaskNode::with_signal(
                Box::new(ClosureTask::new(|_| {})),
                ThreadTarget::Any(ThreadTier::Normal, TaskPriority::High),
                Arc::clone(signal),
            );
            submit_with_prerequisites(hop, &gathered, dispatcher);
            return;
        }

        signal.complete.store(true, Ordering::Release);
        for waiter in signal.subsequents.take_all_and_close() {
            waiter.notify(dispatcher);
        }
    }

    /// Return a uniquely owned signal to its fresh state for reuse.
    pub(crate) fn reset(&mut self) {
        debug_assert!(self
            .gather
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty());
        self.complete = AtomicBool::new(false);
        self.subsequents.reset_open();
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        debug_assert!(
            self.complete.load(Ordering::Relaxed) || self.subsequents.is_empty(),
            "completion signal dropped with registered waiters"
        );
    }
}
