//! Core task model for the weft task graph.
//!
//! This crate defines the vocabulary the rest of the workspace is
//! built from: thread identities and targets, the [`GraphTask`] trait
//! and its dispatchable [`TaskNode`] form, completion signals with
//! dependency tracking, and the lock-free containers the schedulers
//! run on.
//!
//! Nothing in here spawns a thread. The executor crate owns the
//! threads; this crate owns the data model they exchange.

#![warn(missing_docs)]

use core::fmt;

pub mod config;
pub mod error;
pub mod lockfree;
pub mod platform;
pub mod pool;
pub mod signal;
pub mod task;

pub use config::{DispatchMode, GraphConfig, SpinPolicy, MAX_TIER_WORKERS};
pub use error::{GraphError, GraphResult};
pub use platform::PlatformCapabilities;
pub use pool::SignalPool;
pub use signal::{CompletionSignal, SignalRef};
pub use task::{
    submit_with_prerequisites, ClosureTask, Dispatcher, GraphTask, PendingTask, SubsequentsMode,
    TaskContext, TaskNode,
};

/// Identity of a thread known to the task graph.
///
/// Named threads occupy the low indices, anonymous workers follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// Index of a named thread in the graph's named-thread table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedThreadId(pub usize);

impl NamedThreadId {
    /// The corresponding graph-wide thread identity.
    #[must_use]
    pub fn thread_id(self) -> ThreadId {
        ThreadId(self.0)
    }
}

impl fmt::Display for NamedThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "named-{}", self.0)
    }
}

/// Worker pool tier an any-thread item can request.
///
/// Tiers map to distinct sets of worker threads. Platforms that cannot
/// provide a tier remap requests onto the normal tier, see
/// [`platform::remap_target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadTier {
    /// The default worker set. Always present.
    Normal,
    /// Time-critical workers running above normal thread priority.
    High,
    /// Low-priority workers for work that should yield to everything else.
    Background,
}

impl fmt::Display for ThreadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Queue lane within a tier or named thread.
///
/// High-priority items are always drained before normal ones on the
/// same thread or tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Default lane.
    Normal,
    /// Drained before the normal lane.
    High,
}

/// Where a work item wants to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadTarget {
    /// A specific named thread, in the given lane.
    Named(NamedThreadId, TaskPriority),
    /// Any worker in the given tier, in the given lane.
    Any(ThreadTier, TaskPriority),
}

impl ThreadTarget {
    /// Shorthand for the default target: any normal-tier worker,
    /// normal lane.
    #[must_use]
    pub fn any_normal() -> Self {
        Self::Any(ThreadTier::Normal, TaskPriority::Normal)
    }

    /// The lane this target selects.
    #[must_use]
    pub fn priority(self) -> TaskPriority {
        match self {
            Self::Named(_, priority) | Self::Any(_, priority) => priority,
        }
    }
}
