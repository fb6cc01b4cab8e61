//! Work items and the machinery that gets them to a queue.
//!
//! A [`GraphTask`] is the unit of user work. Wrapping it in a
//! [`TaskNode`] pins down where it runs and whether its completion is
//! tracked; [`submit_with_prerequisites`] holds a node back until
//! every prerequisite signal has closed. Submission itself goes
//! through the [`Dispatcher`] trait, implemented by the worker pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::signal::{CompletionSignal, SignalRef};
use crate::{ThreadId, ThreadTarget};

/// Routes ready task nodes to their queues.
///
/// Implemented by the worker pool. Everything below the pool talks to
/// this trait so completion signals can dispatch subsequents without
/// knowing about threads.
pub trait Dispatcher: Send + Sync {
    /// Enqueue a ready node on its target queue. Never fails.
    fn submit(&self, node: TaskNode);

    /// Offer a completion signal back for reuse once the caller is
    /// done with it. Implementations without a recycling pool drop it.
    fn recycle(&self, signal: SignalRef) {
        drop(signal);
    }
}

/// Execution context handed to a running task.
pub struct TaskContext<'a> {
    thread: ThreadId,
    signal: Option<&'a SignalRef>,
    dispatcher: &'a dyn Dispatcher,
}

impl<'a> TaskContext<'a> {
    /// Build a context. Called by the executor per task execution.
    #[must_use]
    pub fn new(
        thread: ThreadId,
        signal: Option<&'a SignalRef>,
        dispatcher: &'a dyn Dispatcher,
    ) -> Self {
        Self {
            thread,
            signal,
            dispatcher,
        }
    }

    /// The graph thread currently executing this task.
    #[must_use]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The completion signal of the running task, if it has one.
    #[must_use]
    pub fn completion_signal(&self) -> Option<&SignalRef> {
        self.signal
    }

    /// The dispatcher for this graph.
    #[must_use]
    pub fn dispatcher(&self) -> &'a dyn Dispatcher {
        self.dispatcher
    }

    /// Defer this task's completion until `child` has completed.
    ///
    /// The running task's signal will not close when the task body
    /// returns; instead a gather hop re-dispatches it once every
    /// deferred signal has closed.
    ///
    /// # Panics
    ///
    /// Panics if the running task is fire-and-forget. Deferring a
    /// completion nobody tracks is a programmer error.
    pub fn dont_complete_until(&self, child: SignalRef) {
        let signal = self
            .signal
            .expect("dont_complete_until called from a fire-and-forget task");
        signal.defer_completion(child);
    }

    /// Submit a successor node from inside a running task.
    pub fn submit(&self, node: TaskNode) {
        self.dispatcher.submit(node);
    }
}

/// A unit of schedulable work.
pub trait GraphTask: Send + 'static {
    /// Execute the task, consuming it.
    fn run(self: Box<Self>, ctx: &mut TaskContext<'_>);
}

/// Adapter turning a closure into a [`GraphTask`].
pub struct ClosureTask<F>
where
    F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
{
    body: F,
}

impl<F> ClosureTask<F>
where
    F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(body: F) -> Self {
        Self { body }
    }
}

impl<F> GraphTask for ClosureTask<F>
where
    F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
{
    fn run(self: Box<Self>, ctx: &mut TaskContext<'_>) {
        (self.body)(ctx);
    }
}

/// Whether anything is allowed to depend on a task's completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsequentsMode {
    /// The task carries a completion signal others can wait on.
    Tracked,
    /// No signal is allocated; the task runs and vanishes.
    FireAndForget,
}

/// A ready-to-dispatch work item: the task, where it runs, and its
/// completion signal if it has one.
pub struct TaskNode {
    task: Box<dyn GraphTask>,
    target: ThreadTarget,
    signal: Option<SignalRef>,
}

impl TaskNode {
    /// A tracked node whose completion closes `signal`.
    #[must_use]
    pub fn with_signal(task: Box<dyn GraphTask>, target: ThreadTarget, signal: SignalRef) -> Self {
        Self {
            task,
            target,
            signal: Some(signal),
        }
    }

    /// A fire-and-forget node.
    #[must_use]
    pub fn detached(task: Box<dyn GraphTask>, target: ThreadTarget) -> Self {
        Self {
            task,
            target,
            signal: None,
        }
    }

    /// Where this node wants to run.
    #[must_use]
    pub fn target(&self) -> ThreadTarget {
        self.target
    }

    /// Re-point the node, used when the platform remaps a tier.
    pub fn set_target(&mut self, target: ThreadTarget) {
        self.target = target;
    }

    /// The node's completion signal, if tracked.
    #[must_use]
    pub fn signal(&self) -> Option<&SignalRef> {
        self.signal.as_ref()
    }

    /// Run the task on the current thread and close its signal.
    ///
    /// This is the single execution point: exactly one call per
    /// accepted node, on whichever thread dequeued it.
    pub fn execute(self, thread: ThreadId, dispatcher: &dyn Dispatcher) {
        let signal = self.signal;
        let mut ctx = TaskContext::new(thread, signal.as_ref(), dispatcher);
        self.task.run(&mut ctx);
        if let Some(signal) = signal {
            CompletionSignal::dispatch_subsequents(&signal, dispatcher);
            dispatcher.recycle(signal);
        }
    }
}

/// A node held back until its prerequisite count drains to zero.
///
/// The count starts at `prerequisites + 1`; the extra registration
/// hold keeps the node from firing while prerequisites are still
/// being wired up. Whichever notify drops the count to zero takes the
/// node out of the slot and submits it, so the node is submitted
/// exactly once no matter how registration races with completions.
pub struct PendingTask {
    remaining: AtomicUsize,
    slot: Mutex<Option<TaskNode>>,
}

impl PendingTask {
    fn new(node: TaskNode, holds: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(holds),
            slot: Mutex::new(Some(node)),
        })
    }

    /// Release one hold; the final release submits the node.
    pub fn notify(&self, dispatcher: &dyn Dispatcher) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let node = self
                .slot
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            debug_assert!(node.is_some(), "pending task fired twice");
            if let Some(node) = node {
                dispatcher.submit(node);
            }
        }
    }
}

/// Submit `node` once every signal in `prerequisites` has completed.
///
/// Prerequisites that already completed count down immediately; with
/// no prerequisites the node is submitted on the spot.
pub fn submit_with_prerequisites(
    node: TaskNode,
    prerequisites: &[SignalRef],
    dispatcher: &dyn Dispatcher,
) {
    if prerequisites.is_empty() {
        dispatcher.submit(node);
        return;
    }
    let pending = PendingTask::new(node, prerequisites.len() + 1);
    for prerequisite in prerequisites {
        if !prerequisite.add_subsequent(Arc::clone(&pending)) {
            pending.notify(dispatcher);
        }
    }
    pending.notify(dispatcher);
}
