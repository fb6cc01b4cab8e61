//! Named-thread task processing.
//!
//! A named thread is owned by the application (a game thread, a
//! render thread) and only runs tasks while it is inside one of the
//! `process_*` calls. Its queue has two private FIFO lanes touched
//! only by the owner, plus a closeable lock-free inbox for every
//! other thread. The inbox close/reopen protocol carries the wake
//! obligation: the producer whose push reopens a closed inbox is the
//! one that triggers the stall event.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use weft_core::lockfree::ClosableList;
use weft_core::{Dispatcher, NamedThreadId, TaskNode, TaskPriority};
use weft_sched::TaskRing;
use weft_sync::ManualResetEvent;

/// How long a processing call keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessUntil {
    /// Return as soon as the lanes and inbox are empty.
    Idle,
    /// Stall when idle; return only after a return request.
    Quit,
}

/// Queue state and processing loop for one named thread.
pub struct NamedThread {
    id: NamedThreadId,
    // Private lanes. Locked only by the owner thread, so the mutexes
    // are uncontended; they exist to keep the type Sync.
    high: Mutex<TaskRing<TaskNode>>,
    normal: Mutex<TaskRing<TaskNode>>,
    inbox: ClosableList<TaskNode>,
    // Count of high-lane items sitting in the inbox. Tells the
    // processing loop to drain the inbox before falling back to the
    // normal lane.
    inbound_high: AtomicUsize,
    quit: AtomicBool,
    processing: AtomicBool,
    attached: AtomicBool,
    stall: ManualResetEvent,
}

impl NamedThread {
    /// Create the queue state for named thread `id`.
    #[must_use]
    pub fn new(id: NamedThreadId) -> Self {
        Self {
            id,
            high: Mutex::new(TaskRing::new()),
            normal: Mutex::new(TaskRing::new()),
            inbox: ClosableList::new_open(),
            inbound_high: AtomicUsize::new(0),
            quit: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            attached: AtomicBool::new(false),
            stall: ManualResetEvent::new(),
        }
    }

    /// This thread's id.
    #[must_use]
    pub fn id(&self) -> NamedThreadId {
        self.id
    }

    /// Whether the owner is currently inside a `process_*` call.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Record an attachment claim on this thread identity. Returns
    /// whether the identity was already claimed; exactly one caller
    /// ever sees `false`.
    pub fn claim_attachment(&self) -> bool {
        self.attached.swap(true, Ordering::SeqCst)
    }

    /// Enqueue from the owning thread straight into a private lane.
    pub fn enqueue_local(&self, node: TaskNode, priority: TaskPriority) {
        let lane = match priority {
            TaskPriority::High => &self.high,
            TaskPriority::Normal => &self.normal,
        };
        lane.lock().unwrap_or_else(|e| e.into_inner()).push(node);
    }

    /// Enqueue from any other thread through the inbox.
    pub fn enqueue_from_other(&self, node: TaskNode, priority: TaskPriority) {
        if priority == TaskPriority::High {
            self.inbound_high.fetch_add(1, Ordering::SeqCst);
        }
        if self.inbox.reopen_if_closed_and_push(node) {
            self.stall.trigger();
        }
    }

    /// Ask a `ProcessUntil::Quit` loop to return once it finishes the
    /// task in hand.
    pub fn request_return(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.stall.trigger();
    }

    /// Run tasks on the owning thread.
    ///
    /// # Panics
    ///
    /// Panics when called re-entrantly: a task running on this thread
    /// must not process the same queue again.
    pub fn process(&self, dispatcher: &dyn Dispatcher, until: ProcessUntil) {
        let was_processing = self.processing.swap(true, Ordering::SeqCst);
        assert!(
            !was_processing,
            "re-entrant task processing on {}",
            self.id
        );
        if until == ProcessUntil::Quit {
            self.quit.store(false, Ordering::SeqCst);
        }

        loop {
            // High-lane work that is still in the inbox outranks
            // anything in the normal lane, so pull the inbox first
            // whenever the counter says it is worth it.
            if self.inbound_high.load(Ordering::SeqCst) > 0 {
                self.drain_inbox();
            }

            let node = self
                .pop_lane(&self.high)
                .or_else(|| self.pop_lane(&self.normal));
            if let Some(node) = node {
                node.execute(self.id.thread_id(), dispatcher);
                continue;
            }

            if self.drain_inbox() {
                continue;
            }

            match until {
                ProcessUntil::Idle => break,
                ProcessUntil::Quit => {
                    // Reset before publishing the closed inbox so a
                    // reopening producer's trigger cannot be lost.
                    self.stall.reset();
                    if self.quit.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.inbox.close_if_empty() {
                        self.stall.wait();
                    }
                }
            }
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    fn pop_lane(&self, lane: &Mutex<TaskRing<TaskNode>>) -> Option<TaskNode> {
        lane.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    /// Move everything in the inbox into the private lanes, keeping
    /// producer insertion order within each lane. Returns whether
    /// anything moved.
    fn drain_inbox(&self) -> bool {
        let inbound = self.inbox.take_all();
        if inbound.is_empty() {
            return false;
        }
        let mut high = self.high.lock().unwrap_or_else(|e| e.into_inner());
        let mut normal = self.normal.lock().unwrap_or_else(|e| e.into_inner());
        for node in inbound {
            match node.target().priority() {
                TaskPriority::High => {
                    self.inbound_high.fetch_sub(1, Ordering::SeqCst);
                    high.push(node);
                }
                TaskPriority::Normal => normal.push(node),
            }
        }
        true
    }
}
