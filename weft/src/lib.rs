//! # Weft
//!
//! A task-graph scheduling runtime: work items with completion
//! signals, dependency ordering, externally owned named threads, and
//! tiers of anonymous worker threads.
//!
//! ## Quick start
//!
//! ```
//! use weft::TaskGraph;
//!
//! let graph = TaskGraph::builder().workers_per_tier(2).build().unwrap();
//! let first = graph.spawn(|_| println!("first"));
//! let second = graph.spawn_after(&[first.clone()], |_| println!("second"));
//! graph.wait_until_complete(&[second]);
//! graph.shutdown();
//! ```
//!
//! Tasks never fail and submission never fails; misuse of the
//! threading API panics. See [`GraphConfig`] for tuning.

#![warn(missing_docs)]

use std::sync::{Arc, OnceLock};

use weft_core::platform::PlatformCapabilities;
use weft_executor::WorkerPool;
use weft_sync::ManualResetEvent;

pub use weft_core::{
    ClosureTask, CompletionSignal, DispatchMode, GraphConfig, GraphError, GraphResult, GraphTask,
    NamedThreadId, SignalRef, SpinPolicy, SubsequentsMode, TaskContext, TaskNode, TaskPriority,
    ThreadId, ThreadTarget, ThreadTier, MAX_TIER_WORKERS,
};

pub mod parallel;

/// Common imports for working with a task graph.
pub mod prelude {
    pub use crate::{
        GraphConfig, SignalRef, TaskGraph, TaskPriority, ThreadTarget, ThreadTier,
    };
}

/// A running task graph: the context object everything happens on.
///
/// There is no implicit singleton; create one with
/// [`TaskGraph::startup`] or [`TaskGraph::builder`] and pass it
/// around (or stash it in [`init_global`] if the application wants
/// one). Dropping the graph shuts the worker pool down.
pub struct TaskGraph {
    pool: Arc<WorkerPool>,
}

impl TaskGraph {
    /// Start a graph with `config`, probing the platform.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or a failed worker
    /// spawn.
    pub fn startup(config: GraphConfig) -> GraphResult<Self> {
        Self::startup_with_capabilities(config, PlatformCapabilities::detect())
    }

    /// Start a graph against explicit platform capabilities. Mostly
    /// for tests and for forcing single-threaded operation.
    ///
    /// # Errors
    ///
    /// Same as [`startup`](Self::startup).
    pub fn startup_with_capabilities(
        config: GraphConfig,
        capabilities: PlatformCapabilities,
    ) -> GraphResult<Self> {
        Ok(Self {
            pool: WorkerPool::start(config, capabilities)?,
        })
    }

    /// Fluent configuration.
    #[must_use]
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Spawn a tracked task on any normal-tier worker.
    pub fn spawn<F>(&self, body: F) -> SignalRef
    where
        F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
    {
        self.spawn_on(ThreadTarget::any_normal(), body)
    }

    /// Spawn a tracked task on an explicit target.
    pub fn spawn_on<F>(&self, target: ThreadTarget, body: F) -> SignalRef
    where
        F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
    {
        self.spawn_after_on(&[], target, body)
    }

    /// Spawn a tracked task that runs after every prerequisite signal
    /// has completed.
    pub fn spawn_after<F>(&self, prerequisites: &[SignalRef], body: F) -> SignalRef
    where
        F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
    {
        self.spawn_after_on(prerequisites, ThreadTarget::any_normal(), body)
    }

    /// Spawn a tracked task with both prerequisites and a target.
    pub fn spawn_after_on<F>(
        &self,
        prerequisites: &[SignalRef],
        target: ThreadTarget,
        body: F,
    ) -> SignalRef
    where
        F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
    {
        let signal = self
            .spawn_task(Box::new(ClosureTask::new(body)), target, SubsequentsMode::Tracked, prerequisites);
        signal.expect("tracked spawn always returns a signal")
    }

    /// Spawn a fire-and-forget task: no signal is allocated and
    /// nothing can wait on it.
    pub fn spawn_detached<F>(&self, target: ThreadTarget, body: F)
    where
        F: FnOnce(&mut TaskContext<'_>) + Send + 'static,
    {
        self.spawn_task(
            Box::new(ClosureTask::new(body)),
            target,
            SubsequentsMode::FireAndForget,
            &[],
        );
    }

    /// Low-level spawn for a prebuilt task object.
    ///
    /// Returns the completion signal for
    /// [`SubsequentsMode::Tracked`], `None` otherwise.
    pub fn spawn_task(
        &self,
        task: Box<dyn GraphTask>,
        target: ThreadTarget,
        mode: SubsequentsMode,
        prerequisites: &[SignalRef],
    ) -> Option<SignalRef> {
        let (node, signal) = match mode {
            SubsequentsMode::Tracked => {
                let signal = self.pool.acquire_signal();
                (
                    TaskNode::with_signal(task, target, Arc::clone(&signal)),
                    Some(signal),
                )
            }
            SubsequentsMode::FireAndForget => (TaskNode::detached(task, target), None),
        };
        weft_core::submit_with_prerequisites(node, prerequisites, &*self.pool);
        signal
    }

    /// Block until every signal has completed.
    ///
    /// Called from an attached named thread that is not already
    /// processing, the thread processes its own queue while it waits,
    /// so waiting on work that targets this thread cannot deadlock.
    /// From any other thread this parks on an event until the last
    /// signal closes.
    pub fn wait_until_complete(&self, signals: &[SignalRef]) {
        if signals.iter().all(|signal| signal.is_complete()) {
            return;
        }
        if let Some(id) = self.pool.current_named() {
            if !self.pool.is_thread_processing(id) {
                tracing::trace!(thread = id.0, "waiting by processing own queue");
                let pool = Arc::clone(&self.pool);
                let node = TaskNode::detached(
                    Box::new(ClosureTask::new(move |_| pool.request_return(id))),
                    ThreadTarget::Named(id, TaskPriority::High),
                );
                weft_core::submit_with_prerequisites(node, signals, &*self.pool);
                self.pool.process_until_quit(id);
                return;
            }
        }
        tracing::trace!(pending = signals.len(), "waiting on completion event");
        let event = Arc::new(ManualResetEvent::new());
        self.trigger_event_when_complete(Arc::clone(&event), signals);
        event.wait();
    }

    /// Trigger `event` once every signal has completed. Triggers
    /// immediately when none are pending.
    pub fn trigger_event_when_complete(&self, event: Arc<ManualResetEvent>, signals: &[SignalRef]) {
        if signals.iter().all(|signal| signal.is_complete()) {
            event.trigger();
            return;
        }
        let node = TaskNode::detached(
            Box::new(ClosureTask::new(move |_| event.trigger())),
            ThreadTarget::Any(ThreadTier::Normal, TaskPriority::High),
        );
        weft_core::submit_with_prerequisites(node, signals, &*self.pool);
    }

    /// Distribute `count` index calls across the workers and block
    /// until all of them have run. See [`parallel::parallel_for`].
    pub fn parallel_for<F>(&self, count: usize, body: F)
    where
        F: Fn(usize) + Sync,
    {
        parallel::parallel_for(self, count, body, false);
    }

    /// Number of normal-tier workers; at least 1 even when the graph
    /// runs single-threaded.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// The calling thread's identity in this graph, if it has one.
    #[must_use]
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.pool.current_thread()
    }

    /// Claim named-thread identity `id` for the calling OS thread.
    ///
    /// # Panics
    ///
    /// Panics for an unknown id, a thread that already holds an
    /// identity in this graph, or an id another thread has already
    /// claimed.
    pub fn attach_named(&self, id: NamedThreadId) {
        self.pool.attach_named(id);
    }

    /// Run tasks queued for `id` on the calling thread until its
    /// queues are empty. The thread must be attached as `id`.
    pub fn process_until_idle(&self, id: NamedThreadId) {
        self.pool.process_until_idle(id);
    }

    /// Run tasks queued for `id`, stalling when idle, until
    /// [`request_return`](Self::request_return) is called.
    pub fn process_until_quit(&self, id: NamedThreadId) {
        self.pool.process_until_quit(id);
    }

    /// Ask `id`'s processing loop to return.
    pub fn request_return(&self, id: NamedThreadId) {
        self.pool.request_return(id);
    }

    /// Whether named thread `id` is inside a processing loop.
    #[must_use]
    pub fn is_thread_processing(&self, id: NamedThreadId) -> bool {
        self.pool.is_thread_processing(id)
    }

    /// Stop the worker threads and wait for them to exit.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }

    pub(crate) fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

impl Drop for TaskGraph {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

/// Builder for [`TaskGraph`].
pub struct GraphBuilder {
    config: GraphConfig,
    capabilities: Option<PlatformCapabilities>,
}

impl GraphBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GraphConfig::default(),
            capabilities: None,
        }
    }

    /// Number of externally owned named threads (at least 1).
    #[must_use]
    pub fn named_threads(mut self, count: usize) -> Self {
        self.config.named_threads = count;
        self
    }

    /// Workers per tier; 0 sizes from the machine.
    #[must_use]
    pub fn workers_per_tier(mut self, count: usize) -> Self {
        self.config.workers_per_tier = count;
        self
    }

    /// Also spawn a high-priority worker tier.
    #[must_use]
    pub fn high_tier(mut self, enabled: bool) -> Self {
        self.config.enable_high_tier = enabled;
        self
    }

    /// Also spawn a background worker tier.
    #[must_use]
    pub fn background_tier(mut self, enabled: bool) -> Self {
        self.config.enable_background_tier = enabled;
        self
    }

    /// Dispatch strategy for every tier.
    #[must_use]
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    /// Idle-wait policy for every tier.
    #[must_use]
    pub fn spin(mut self, policy: SpinPolicy) -> Self {
        self.config.spin = policy;
        self
    }

    /// Prefix for worker thread names.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Worker stack size in bytes.
    #[must_use]
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.config.worker_stack_size = Some(bytes);
        self
    }

    /// Force single-threaded operation: no workers are spawned and
    /// all any-thread work runs on named thread 0 during its
    /// processing calls.
    #[must_use]
    pub fn single_threaded(mut self) -> Self {
        self.capabilities = Some(PlatformCapabilities::single_threaded());
        self
    }

    /// Start the graph.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or a failed worker
    /// spawn.
    pub fn build(self) -> GraphResult<TaskGraph> {
        let capabilities = self
            .capabilities
            .unwrap_or_else(PlatformCapabilities::detect);
        TaskGraph::startup_with_capabilities(self.config, capabilities)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_GRAPH: OnceLock<TaskGraph> = OnceLock::new();

/// Install a process-wide graph for applications that want one.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if a global graph is already
/// installed, or any startup error.
pub fn init_global(config: GraphConfig) -> GraphResult<&'static TaskGraph> {
    let graph = TaskGraph::startup(config)?;
    GLOBAL_GRAPH
        .set(graph)
        .map_err(|_| GraphError::InvalidConfiguration("global task graph already installed"))?;
    Ok(GLOBAL_GRAPH.get().expect("just installed"))
}

/// The installed global graph, if any.
#[must_use]
pub fn try_global() -> Option<&'static TaskGraph> {
    GLOBAL_GRAPH.get()
}
