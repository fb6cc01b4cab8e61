//! Graph configuration.
//!
//! All tuning lives here and is fixed at startup. Nothing in the
//! running graph consults a mutable global.

use crate::error::{GraphError, GraphResult};

/// Upper bound on workers per tier.
///
/// The scheduler packs a stalled bit and a working bit per worker
/// into a single 32-bit atomic word, which caps each tier at 13
/// workers. Configurations above this are rejected at startup.
pub const MAX_TIER_WORKERS: usize = 13;

/// Which dispatch strategy a tier scheduler runs.
///
/// Chosen once at startup; the two strategies are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Lock-free queues with a packed stall bitfield.
    Fast,
    /// Incoming LIFO stacks promoted to sorted lists under a mutex.
    /// A conservative fallback for platforms with weak atomics.
    Locked,
}

/// How idle workers wait for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinPolicy {
    /// Stall on an event and rely on producers to wake a worker.
    Block,
    /// Busy-poll instead of stalling. Producers skip the wake step;
    /// at least one worker per tier keeps polling so nothing is lost.
    Spin {
        /// Yield the time slice between polling passes.
        yield_each_pass: bool,
    },
}

/// Startup configuration for a task graph.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Number of externally owned named threads. At least 1; named
    /// thread 0 doubles as the fallback target on single-threaded
    /// platforms.
    pub named_threads: usize,
    /// Workers per enabled tier. Zero means size from the machine.
    pub workers_per_tier: usize,
    /// Spawn a high-priority worker tier when the platform has one.
    pub enable_high_tier: bool,
    /// Spawn a background worker tier when the platform has one.
    pub enable_background_tier: bool,
    /// Dispatch strategy for every tier.
    pub dispatch_mode: DispatchMode,
    /// Idle-wait policy for every tier.
    pub spin: SpinPolicy,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Worker stack size in bytes; `None` takes the platform default.
    pub worker_stack_size: Option<usize>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            named_threads: 1,
            workers_per_tier: 0,
            enable_high_tier: false,
            enable_background_tier: false,
            dispatch_mode: DispatchMode::Fast,
            spin: SpinPolicy::Block,
            thread_name_prefix: "weft".to_string(),
            worker_stack_size: None,
        }
    }
}

impl GraphConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidConfiguration`] for a zero named
    /// thread count and [`GraphError::TooManyWorkers`] when the
    /// per-tier worker request exceeds [`MAX_TIER_WORKERS`].
    pub fn validate(&self) -> GraphResult<()> {
        if self.named_threads == 0 {
            return Err(GraphError::InvalidConfiguration(
                "named thread count must be at least 1",
            ));
        }
        if self.workers_per_tier > MAX_TIER_WORKERS {
            return Err(GraphError::TooManyWorkers {
                requested: self.workers_per_tier,
                max: MAX_TIER_WORKERS,
            });
        }
        if self.thread_name_prefix.is_empty() {
            return Err(GraphError::InvalidConfiguration(
                "thread name prefix must not be empty",
            ));
        }
        Ok(())
    }
}
