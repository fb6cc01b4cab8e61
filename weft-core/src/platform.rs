//! Platform capability probing and target remapping.
//!
//! Not every platform has distinct high-priority or background
//! threads, and some have no usable multithreading at all. Missing
//! capabilities never surface as errors; targets are remapped to the
//! closest thing the platform can run.

use crate::{NamedThreadId, TaskPriority, ThreadTarget, ThreadTier};

/// What the current platform can schedule.
#[derive(Debug, Clone, Copy)]
pub struct PlatformCapabilities {
    /// Whether worker threads exist at all.
    pub multithreading: bool,
    /// Whether a distinct high-priority thread tier is available.
    pub high_priority_threads: bool,
    /// Whether a distinct background thread tier is available.
    pub background_threads: bool,
}

impl PlatformCapabilities {
    /// Probe the running machine.
    #[must_use]
    pub fn detect() -> Self {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            multithreading: cores > 1,
            high_priority_threads: cores > 1,
            background_threads: cores > 1,
        }
    }

    /// Capabilities of a machine with no worker threads. Used for
    /// forced single-threaded operation and in tests.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            multithreading: false,
            high_priority_threads: false,
            background_threads: false,
        }
    }
}

/// Remap a target onto what the platform actually provides.
///
/// A missing high tier demotes to the normal tier but promotes the
/// lane to high priority in compensation. A missing background tier
/// promotes to the normal tier in its requested lane. Without
/// multithreading, any-thread work lands on `fallback`, the primary
/// named thread. Named targets are never remapped.
#[must_use]
pub fn remap_target(
    target: ThreadTarget,
    capabilities: &PlatformCapabilities,
    fallback: NamedThreadId,
) -> ThreadTarget {
    let target = match target {
        ThreadTarget::Any(ThreadTier::High, _) if !capabilities.high_priority_threads => {
            ThreadTarget::Any(ThreadTier::Normal, TaskPriority::High)
        }
        ThreadTarget::Any(ThreadTier::Background, priority)
            if !capabilities.background_threads =>
        {
            ThreadTarget::Any(ThreadTier::Normal, priority)
        }
        other => other,
    };
    match target {
        ThreadTarget::Any(_, priority) if !capabilities.multithreading => {
            ThreadTarget::Named(fallback, priority)
        }
        other => other,
    }
}
