//! Worker pool for the weft task graph.
//!
//! The [`WorkerPool`] owns every thread the graph knows about: the
//! queue state of externally owned named threads and the spawned
//! anonymous workers, grouped into tiers. It implements
//! [`Dispatcher`], so everything below it routes tasks by handing
//! them back to the pool.

#![warn(missing_docs)]

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use weft_core::platform::remap_target;
use weft_core::{
    Dispatcher, GraphConfig, GraphResult, NamedThreadId, PlatformCapabilities, SignalPool,
    SignalRef, SpinPolicy, TaskNode, TaskPriority, ThreadId, ThreadTarget, ThreadTier,
    MAX_TIER_WORKERS,
};
use weft_sched::TierScheduler;

pub mod anythread;
pub mod named;

pub use anythread::WorkerSlot;
pub use named::{NamedThread, ProcessUntil};

use anythread::run_worker;

// Which graph, if any, the current OS thread belongs to, keyed by the
// pool's epoch so identities from a dead graph do not leak into a new
// one.
thread_local! {
    static CURRENT: Cell<Option<(u64, usize)>> = const { Cell::new(None) };
}

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

struct TierSet {
    tier: ThreadTier,
    scheduler: Arc<TierScheduler>,
    workers: Vec<Arc<WorkerSlot>>,
}

/// The thread pool and submission router of one task graph.
pub struct WorkerPool {
    capabilities: PlatformCapabilities,
    named: Vec<NamedThread>,
    tiers: Vec<TierSet>,
    signals: SignalPool,
    epoch: u64,
    yield_each_pass: bool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Validate `config`, build the schedulers, and spawn the worker
    /// threads.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or when the OS
    /// refuses to spawn a worker. On spawn failure every
    /// already-started worker is stopped before returning.
    pub fn start(
        config: GraphConfig,
        capabilities: PlatformCapabilities,
    ) -> GraphResult<Arc<Self>> {
        config.validate()?;

        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        let named: Vec<NamedThread> = (0..config.named_threads)
            .map(|i| NamedThread::new(NamedThreadId(i)))
            .collect();

        let workers_per_tier = if config.workers_per_tier > 0 {
            config.workers_per_tier
        } else {
            num_cpus::get()
                .saturating_sub(config.named_threads)
                .clamp(1, MAX_TIER_WORKERS)
        };

        // Narrow the capabilities to the tiers actually enabled, so
        // target remapping only ever points at a running tier.
        let capabilities = PlatformCapabilities {
            multithreading: capabilities.multithreading,
            high_priority_threads: capabilities.high_priority_threads
                && config.enable_high_tier,
            background_threads: capabilities.background_threads
                && config.enable_background_tier,
        };

        let mut tier_kinds = Vec::new();
        if capabilities.multithreading {
            tier_kinds.push(ThreadTier::Normal);
            if capabilities.high_priority_threads {
                tier_kinds.push(ThreadTier::High);
            }
            if capabilities.background_threads {
                tier_kinds.push(ThreadTier::Background);
            }
        }

        let mut tiers = Vec::with_capacity(tier_kinds.len());
        let mut next_thread = config.named_threads;
        for tier in tier_kinds {
            let scheduler = Arc::new(TierScheduler::new(
                config.dispatch_mode,
                config.spin,
                workers_per_tier,
            ));
            let workers = (0..workers_per_tier)
                .map(|_| {
                    let slot = Arc::new(WorkerSlot::new(ThreadId(next_thread)));
                    next_thread += 1;
                    slot
                })
                .collect();
            tiers.push(TierSet {
                tier,
                scheduler,
                workers,
            });
        }

        let pool = Arc::new(Self {
            capabilities,
            named,
            tiers,
            signals: SignalPool::new(),
            epoch,
            yield_each_pass: matches!(
                config.spin,
                SpinPolicy::Spin {
                    yield_each_pass: true
                }
            ),
            handles: Mutex::new(Vec::new()),
        });

        for tier_index in 0..pool.tiers.len() {
            let set = &pool.tiers[tier_index];
            for worker_index in 0..set.workers.len() {
                let name = format!(
                    "{}-{}-{}",
                    config.thread_name_prefix, set.tier, worker_index
                );
                let mut builder = std::thread::Builder::new().name(name);
                if let Some(stack) = config.worker_stack_size {
                    builder = builder.stack_size(stack);
                }
                let pool_for_worker = Arc::clone(&pool);
                let spawned = builder.spawn(move || {
                    let set = &pool_for_worker.tiers[tier_index];
                    let slot = &set.workers[worker_index];
                    CURRENT.with(|c| c.set(Some((pool_for_worker.epoch, slot.thread().0))));
                    run_worker(
                        slot,
                        &set.workers,
                        worker_index,
                        &set.scheduler,
                        &*pool_for_worker,
                        pool_for_worker.yield_each_pass,
                    );
                });
                match spawned {
                    Ok(handle) => pool
                        .handles
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(handle),
                    Err(err) => {
                        pool.shutdown();
                        return Err(err.into());
                    }
                }
            }
        }

        tracing::info!(
            named_threads = config.named_threads,
            worker_threads = pool.spawned_worker_count(),
            tiers = pool.tiers.len(),
            mode = ?config.dispatch_mode,
            "task graph started"
        );
        Ok(pool)
    }

    fn spawned_worker_count(&self) -> usize {
        self.tiers.iter().map(|set| set.workers.len()).sum()
    }

    /// Number of anonymous workers in the normal tier. At least 1 is
    /// reported even when the graph runs single-threaded, so sizing
    /// arithmetic (`work / worker_count`) stays valid.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.tiers
            .iter()
            .find(|set| set.tier == ThreadTier::Normal)
            .map_or(1, |set| set.workers.len().max(1))
    }

    /// The capabilities this pool was started with.
    #[must_use]
    pub fn capabilities(&self) -> &PlatformCapabilities {
        &self.capabilities
    }

    /// Take a completion signal from the recycling pool.
    #[must_use]
    pub fn acquire_signal(&self) -> SignalRef {
        self.signals.acquire()
    }

    /// The graph thread identity of the calling OS thread, if it has
    /// one in this graph.
    #[must_use]
    pub fn current_thread(&self) -> Option<ThreadId> {
        CURRENT.with(|c| c.get()).and_then(|(epoch, index)| {
            if epoch == self.epoch {
                Some(ThreadId(index))
            } else {
                None
            }
        })
    }

    /// The named-thread identity of the calling thread, if it is
    /// attached as one in this graph.
    #[must_use]
    pub fn current_named(&self) -> Option<NamedThreadId> {
        self.current_thread()
            .filter(|thread| thread.0 < self.named.len())
            .map(|thread| NamedThreadId(thread.0))
    }

    /// Claim a named-thread identity for the calling OS thread.
    ///
    /// # Panics
    ///
    /// Panics for an unknown id, when the calling thread already
    /// holds an identity in this graph, or when another thread has
    /// already claimed `id`.
    pub fn attach_named(&self, id: NamedThreadId) {
        assert!(id.0 < self.named.len(), "unknown named thread {id}");
        assert!(
            self.current_thread().is_none(),
            "thread already attached to this graph"
        );
        assert!(
            !self.named[id.0].claim_attachment(),
            "{id} is already attached to another thread"
        );
        CURRENT.with(|c| c.set(Some((self.epoch, id.0))));
    }

    fn named(&self, id: NamedThreadId) -> &NamedThread {
        assert!(id.0 < self.named.len(), "unknown named thread {id}");
        &self.named[id.0]
    }

    /// Run tasks on the calling thread, which must be attached as
    /// `id`, until the thread's queues are empty.
    pub fn process_until_idle(&self, id: NamedThreadId) {
        self.assert_attached(id);
        self.named(id).process(self, ProcessUntil::Idle);
    }

    /// Run tasks on the calling thread, which must be attached as
    /// `id`, stalling when idle, until a return is requested.
    pub fn process_until_quit(&self, id: NamedThreadId) {
        self.assert_attached(id);
        self.named(id).process(self, ProcessUntil::Quit);
    }

    /// Ask the processing loop of `id` to return.
    pub fn request_return(&self, id: NamedThreadId) {
        self.named(id).request_return();
    }

    /// Whether named thread `id` is currently inside a processing
    /// loop.
    #[must_use]
    pub fn is_thread_processing(&self, id: NamedThreadId) -> bool {
        self.named(id).is_processing()
    }

    fn assert_attached(&self, id: NamedThreadId) {
        assert_eq!(
            self.current_thread(),
            Some(id.thread_id()),
            "only the thread attached as {id} may process its queue"
        );
    }

    fn tier_set(&self, tier: ThreadTier) -> &TierSet {
        self.tiers
            .iter()
            .find(|set| set.tier == tier)
            .expect("target tier not remapped onto a running tier")
    }

    /// Stop every worker thread and wait for them to exit. Idempotent;
    /// named threads are externally owned and not joined here.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()),
        );
        if handles.is_empty() {
            return;
        }
        for set in &self.tiers {
            for slot in &set.workers {
                slot.request_quit();
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
        tracing::info!("task graph stopped");
    }
}

impl Dispatcher for WorkerPool {
    fn submit(&self, mut node: TaskNode) {
        let target = remap_target(node.target(), &self.capabilities, NamedThreadId(0));
        node.set_target(target);
        match target {
            ThreadTarget::Named(id, priority) => {
                let named = self.named(id);
                if self.current_thread() == Some(id.thread_id()) {
                    named.enqueue_local(node, priority);
                } else {
                    named.enqueue_from_other(node, priority);
                }
            }
            ThreadTarget::Any(tier, priority) => {
                let set = self.tier_set(tier);
                if let Some(wake) = set.scheduler.push(node, priority) {
                    set.workers[wake.0].wake();
                }
            }
        }
    }

    fn recycle(&self, signal: SignalRef) {
        self.signals.recycle(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Once;
    use weft_core::ClosureTask;

    fn init_logging() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
                )
                .with_test_writer()
                .try_init();
        });
    }

    fn test_config() -> GraphConfig {
        GraphConfig {
            workers_per_tier: 2,
            ..GraphConfig::default()
        }
    }

    fn full_caps() -> PlatformCapabilities {
        PlatformCapabilities {
            multithreading: true,
            high_priority_threads: true,
            background_threads: true,
        }
    }

    fn counting_task(counter: &Arc<AtomicUsize>) -> Box<dyn weft_core::GraphTask> {
        let counter = Arc::clone(counter);
        Box::new(ClosureTask::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn pool_runs_any_thread_tasks() {
        init_logging();
        let pool = WorkerPool::start(test_config(), full_caps()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            pool.submit(TaskNode::detached(
                counting_task(&counter),
                ThreadTarget::any_normal(),
            ));
        }
        while counter.load(Ordering::SeqCst) < 100 {
            std::thread::yield_now();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn single_threaded_pool_routes_to_the_primary_named_thread() {
        init_logging();
        let pool = WorkerPool::start(
            GraphConfig::default(),
            PlatformCapabilities::single_threaded(),
        )
        .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(TaskNode::detached(
            counting_task(&counter),
            ThreadTarget::any_normal(),
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        pool.attach_named(NamedThreadId(0));
        pool.process_until_idle(NamedThreadId(0));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown();
    }

    #[test]
    fn disabled_tier_submission_lands_on_the_normal_tier() {
        init_logging();
        // High tier is off by default; the submission must demote
        // instead of targeting a tier that was never spawned.
        let pool = WorkerPool::start(test_config(), full_caps()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(TaskNode::detached(
            counting_task(&counter),
            ThreadTarget::Any(ThreadTier::High, TaskPriority::Normal),
        ));
        while counter.load(Ordering::SeqCst) < 1 {
            std::thread::yield_now();
        }
        pool.shutdown();
    }

    #[test]
    fn worker_count_reports_the_normal_tier() {
        init_logging();
        let pool = WorkerPool::start(test_config(), full_caps()).unwrap();
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown();
    }

    #[test]
    fn named_submission_from_another_thread_lands_in_the_inbox() {
        init_logging();
        let pool = WorkerPool::start(test_config(), full_caps()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(TaskNode::detached(
            counting_task(&counter),
            ThreadTarget::Named(NamedThreadId(0), TaskPriority::Normal),
        ));
        pool.attach_named(NamedThreadId(0));
        pool.process_until_idle(NamedThreadId(0));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    #[should_panic(expected = "already attached to another thread")]
    fn attaching_the_same_named_id_from_two_threads_panics() {
        init_logging();
        let pool = WorkerPool::start(test_config(), full_caps()).unwrap();
        {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.attach_named(NamedThreadId(0)))
                .join()
                .unwrap();
        }
        // The first claim won; this thread must not also become the
        // owner of named thread 0's private lanes.
        pool.attach_named(NamedThreadId(0));
    }

    #[test]
    #[should_panic(expected = "unknown named thread")]
    fn unknown_named_target_panics() {
        init_logging();
        let pool = WorkerPool::start(test_config(), full_caps()).unwrap();
        let node = TaskNode::detached(
            Box::new(ClosureTask::new(|_| {})),
            ThreadTarget::Named(NamedThreadId(9), TaskPriority::Normal),
        );
        pool.submit(node);
    }
}
