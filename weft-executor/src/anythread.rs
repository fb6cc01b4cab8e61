//! Anonymous worker threads.
//!
//! Each worker belongs to one tier and drives that tier's scheduler
//! in a fetch/execute loop. The scheduler returns directives; this
//! module owns the events and does the actual sleeping and waking.

use std::sync::atomic::{AtomicBool, Ordering};

use weft_core::{Dispatcher, ThreadId};
use weft_sched::{FindWork, TierScheduler, WakeWorker};
use weft_sync::ManualResetEvent;

/// Shared per-worker slot: the stall event and quit flag producers
/// and the pool reach the worker through.
pub struct WorkerSlot {
    thread: ThreadId,
    stall: ManualResetEvent,
    quit: AtomicBool,
}

impl WorkerSlot {
    /// Create the slot for the worker occupying graph thread `thread`.
    #[must_use]
    pub fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            stall: ManualResetEvent::new(),
            quit: AtomicBool::new(false),
        }
    }

    /// The worker's graph-wide thread id.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Wake the worker out of a stall.
    pub fn wake(&self) {
        self.stall.trigger();
    }

    /// Ask the worker loop to exit and wake it so it notices.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.stall.trigger();
    }
}

/// The worker thread body.
///
/// The reset-then-check ordering is load-bearing: the event is reset
/// before the quit flag is read and before any stalled bit becomes
/// visible to producers, so a trigger aimed at this cycle always
/// lands after the reset and cannot be wiped out by it.
pub fn run_worker(
    slot: &WorkerSlot,
    siblings: &[std::sync::Arc<WorkerSlot>],
    worker_index: usize,
    scheduler: &TierScheduler,
    dispatcher: &dyn Dispatcher,
    yield_each_pass: bool,
) {
    tracing::debug!(thread = %slot.thread(), "worker online");
    loop {
        slot.stall.reset();
        if slot.quit.load(Ordering::SeqCst) {
            break;
        }
        match scheduler.find_work(worker_index) {
            FindWork::Task { node, wake } => {
                if let Some(WakeWorker(spare)) = wake {
                    tracing::trace!(worker = spare, "waking spare worker");
                    siblings[spare].wake();
                }
                node.execute(slot.thread(), dispatcher);
            }
            FindWork::Stall => {
                tracing::trace!(thread = %slot.thread(), "worker stalled");
                slot.stall.wait();
            }
            FindWork::Retry => {
                if yield_each_pass {
                    std::thread::yield_now();
                }
            }
        }
    }
    tracing::debug!(thread = %slot.thread(), "worker offline");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use weft_core::{ClosureTask, DispatchMode, SpinPolicy, TaskNode, TaskPriority, ThreadTarget};

    struct NullDispatcher;

    impl Dispatcher for NullDispatcher {
        fn submit(&self, _node: TaskNode) {
            panic!("no successors in these tests");
        }
    }

    #[test]
    fn worker_executes_pushed_tasks_and_quits() {
        let scheduler = Arc::new(TierScheduler::new(DispatchMode::Fast, SpinPolicy::Block, 1));
        let slot = Arc::new(WorkerSlot::new(ThreadId(1)));
        let siblings = vec![Arc::clone(&slot)];
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = {
            let scheduler = Arc::clone(&scheduler);
            let slot = Arc::clone(&slot);
            let siblings = siblings.clone();
            std::thread::spawn(move || {
                run_worker(&slot, &siblings, 0, &scheduler, &NullDispatcher, false);
            })
        };

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            let task = TaskNode::detached(
                Box::new(ClosureTask::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
                ThreadTarget::any_normal(),
            );
            if let Some(WakeWorker(w)) = scheduler.push(task, TaskPriority::Normal) {
                siblings[w].wake();
            }
        }

        while counter.load(Ordering::SeqCst) < 10 {
            std::thread::yield_now();
        }
        slot.request_quit();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn repeated_stall_wake_cycles_lose_no_tasks() {
        let scheduler = Arc::new(TierScheduler::new(DispatchMode::Fast, SpinPolicy::Block, 2));
        let slots: Vec<_> = (0..2)
            .map(|i| Arc::new(WorkerSlot::new(ThreadId(1 + i))))
            .collect();
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|w| {
                let scheduler = Arc::clone(&scheduler);
                let slots = slots.clone();
                std::thread::spawn(move || {
                    run_worker(&slots[w], &slots, w, &scheduler, &NullDispatcher, false);
                })
            })
            .collect();

        // Bursts separated by quiet gaps so the workers keep
        // re-entering the stall path while pushes race the lane
        // re-check.
        let total = 800usize;
        for burst in 0..(total / 4) {
            for _ in 0..4 {
                let counter = Arc::clone(&counter);
                let task = TaskNode::detached(
                    Box::new(ClosureTask::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                    ThreadTarget::any_normal(),
                );
                if let Some(WakeWorker(w)) = scheduler.push(task, TaskPriority::Normal) {
                    slots[w].wake();
                }
            }
            if burst % 8 == 0 {
                std::thread::sleep(std::time::Duration::from_micros(50));
            }
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while counter.load(Ordering::SeqCst) < total {
            assert!(
                std::time::Instant::now() < deadline,
                "a pushed task was never executed"
            );
            std::thread::yield_now();
        }
        for slot in &slots {
            slot.request_quit();
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
