//! Per-tier scheduling: global queue lanes plus stall/wake logic.
//!
//! A [`TierScheduler`] never blocks and never touches an event. Every
//! operation returns directives instead: a push may return a worker
//! index the caller must wake, and a fetch may tell the caller to
//! stall or to spin another pass. The executor owns the events, which
//! keeps all of the state transitions here single-thread testable.
//!
//! The fast-mode stall handshake is a store-buffer litmus: the worker
//! writes its stalled bit then reads the queues, while a producer
//! writes the queue then reads the state word. With acquire/release
//! alone both sides may read stale values and the wakeup is lost, so
//! each side puts a `SeqCst` fence between its write and its read.

use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Mutex;

use weft_core::lockfree::{LockFreeStack, MpmcQueue};
use weft_core::{DispatchMode, SpinPolicy, TaskNode, TaskPriority};

use crate::state::WorkerStateMask;

/// A worker index the caller must wake by triggering its stall event.
///
/// Each directive corresponds to exactly one consumed stall: either a
/// cleared stalled bit (fast mode) or a popped stall hint (locked
/// mode), so no two callers wake the same stall twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeWorker(pub usize);

/// Outcome of a worker's fetch attempt.
pub enum FindWork {
    /// A task to execute, plus at most one worker to wake first.
    Task {
        /// The fetched task.
        node: TaskNode,
        /// Anti-starvation wake: set when this fetch observed every
        /// worker in the tier stalled or working.
        wake: Option<WakeWorker>,
    },
    /// The worker published a stalled bit (or stall hint) and must
    /// wait on its event before fetching again.
    Stall,
    /// Nothing to do and no stall was published; poll again.
    Retry,
}

struct ReadyLanes {
    high: VecDeque<TaskNode>,
    normal: VecDeque<TaskNode>,
}

enum Strategy {
    Fast {
        high: MpmcQueue<TaskNode>,
        normal: MpmcQueue<TaskNode>,
        state: WorkerStateMask,
    },
    Locked {
        incoming_high: LockFreeStack<TaskNode>,
        incoming_normal: LockFreeStack<TaskNode>,
        ready: Mutex<ReadyLanes>,
        stalled: LockFreeStack<usize>,
        round_robin: AtomicUsize,
    },
}

/// Scheduler for one worker tier.
pub struct TierScheduler {
    strategy: Strategy,
    spin: bool,
    worker_count: usize,
}

impl TierScheduler {
    /// Create a scheduler for a tier of `worker_count` workers.
    #[must_use]
    pub fn new(mode: DispatchMode, spin: SpinPolicy, worker_count: usize) -> Self {
        debug_assert!(worker_count >= 1);
        let strategy = match mode {
            DispatchMode::Fast => Strategy::Fast {
                high: MpmcQueue::new(),
                normal: MpmcQueue::new(),
                state: WorkerStateMask::new(),
            },
            DispatchMode::Locked => Strategy::Locked {
                incoming_high: LockFreeStack::new(),
                incoming_normal: LockFreeStack::new(),
                ready: Mutex::new(ReadyLanes {
                    high: VecDeque::new(),
                    normal: VecDeque::new(),
                }),
                stalled: LockFreeStack::new(),
                round_robin: AtomicUsize::new(0),
            },
        };
        Self {
            strategy,
            spin: matches!(spin, SpinPolicy::Spin { .. }),
            worker_count,
        }
    }

    /// Number of workers this tier schedules for.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Enqueue a task in the given lane.
    ///
    /// Returns the worker the producer must wake, if any. In spin
    /// mode producers never wake anybody; a polling worker will find
    /// the task.
    pub fn push(&self, node: TaskNode, priority: TaskPriority) -> Option<WakeWorker> {
        match &self.strategy {
            Strategy::Fast { high, normal, state } => {
                match priority {
                    TaskPriority::High => high.push(node),
                    TaskPriority::Normal => normal.push(node),
                }
                if self.spin {
                    return None;
                }
                // The queue push must be globally ordered before the
                // state read, or this push and a stalling worker can
                // each miss the other's write.
                fence(Ordering::SeqCst);
                // Claim one stalled worker. The CAS makes this push the
                // only waker of that particular stall.
                loop {
                    let snapshot = state.load();
                    let Some(candidate) = snapshot.highest_stalled() else {
                        return None;
                    };
                    if state
                        .compare_exchange(snapshot, snapshot.without_stalled(candidate))
                        .is_ok()
                    {
                        return Some(WakeWorker(candidate));
                    }
                }
            }
            Strategy::Locked {
                incoming_high,
                incoming_normal,
                stalled,
                round_robin,
                ..
            } => {
                match priority {
                    TaskPriority::High => incoming_high.push(node),
                    TaskPriority::Normal => incoming_normal.push(node),
                }
                if self.spin {
                    return None;
                }
                if let Some(worker) = stalled.pop() {
                    return Some(WakeWorker(worker));
                }
                // No known stall; nudge a worker round-robin. A
                // redundant trigger on an awake worker is harmless.
                let next = round_robin.fetch_add(1, Ordering::Relaxed);
                Some(WakeWorker(next % self.worker_count))
            }
        }
    }

    /// Fetch work for `worker`, or decide how it should idle.
    pub fn find_work(&self, worker: usize) -> FindWork {
        debug_assert!(worker < self.worker_count);
        match &self.strategy {
            Strategy::Fast { high, normal, state } => {
                self.find_work_fast(worker, high, normal, state)
            }
            Strategy::Locked { .. } => self.find_work_locked(worker),
        }
    }

    fn find_work_fast(
        &self,
        worker: usize,
        high: &MpmcQueue<TaskNode>,
        normal: &MpmcQueue<TaskNode>,
        state: &WorkerStateMask,
    ) -> FindWork {
        loop {
            if let Some(node) = high.pop().or_else(|| normal.pop()) {
                let wake = self.note_working(worker, state);
                return FindWork::Task { node, wake };
            }

            // Both lanes looked empty. Publish not-working, and a
            // stalled bit unless this worker is the tier's last
            // non-stalled one in spin mode.
            let snapshot = state.load();
            let base = snapshot.without_working(worker).without_stalled(worker);
            let may_stall = !self.spin || base.stalled_count() + 1 < self.worker_count;
            let target = if may_stall {
                base.with_stalled(worker)
            } else {
                base
            };
            if target == snapshot {
                // State already says what we were about to say. If the
                // stalled bit is up, a producer owes us a trigger.
                return if may_stall {
                    FindWork::Stall
                } else {
                    FindWork::Retry
                };
            }
            if state.compare_exchange(snapshot, target).is_err() {
                continue;
            }
            if !may_stall {
                return FindWork::Retry;
            }

            // Counterpart of the fence in `push`: order the stalled
            // bit before the lane re-read. A task pushed between our
            // last pop and the CAS would otherwise sleep with us.
            fence(Ordering::SeqCst);
            if high.is_empty() && normal.is_empty() {
                return FindWork::Stall;
            }
            loop {
                let current = state.load();
                if !current.is_stalled(worker) {
                    // A producer claimed our stall and will trigger the
                    // event; loop around and race for the task.
                    break;
                }
                if state
                    .compare_exchange(current, current.without_stalled(worker))
                    .is_ok()
                {
                    break;
                }
            }
        }
    }

    /// Mark `worker` working, waking a spare if the whole tier is now
    /// stalled-or-working.
    fn note_working(&self, worker: usize, state: &WorkerStateMask) -> Option<WakeWorker> {
        loop {
            let snapshot = state.load();
            let mut next = snapshot.without_stalled(worker);
            if !next.is_working(worker) {
                next = next.with_working(worker);
            }
            let mut wake = None;
            if next.stalled_count() + next.working_count() == self.worker_count {
                if let Some(candidate) = next.highest_stalled() {
                    next = next.without_stalled(candidate);
                    wake = Some(WakeWorker(candidate));
                }
            }
            if next == snapshot {
                return None;
            }
            if state.compare_exchange(snapshot, next).is_ok() {
                return wake;
            }
        }
    }

    fn find_work_locked(&self, worker: usize) -> FindWork {
        let Strategy::Locked {
            incoming_high,
            incoming_normal,
            ready,
            stalled,
            ..
        } = &self.strategy
        else {
            unreachable!("locked fetch on a fast scheduler");
        };

        {
            let mut lanes = ready.lock().unwrap_or_else(|e| e.into_inner());
            for node in incoming_high.pop_all() {
                lanes.high.push_back(node);
            }
            for node in incoming_normal.pop_all() {
                lanes.normal.push_back(node);
            }
            if let Some(node) = lanes.high.pop_front().or_else(|| lanes.normal.pop_front()) {
                return FindWork::Task { node, wake: None };
            }
        }

        if self.spin {
            FindWork::Retry
        } else {
            stalled.push(worker);
            FindWork::Stall
        }
    }
}
