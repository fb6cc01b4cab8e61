//! FIFO ring for a named thread's private lanes.

use std::collections::VecDeque;

/// A grow-on-demand FIFO ring.
///
/// Backs the private queue lanes of a named thread. Only the owning
/// thread touches a lane; cross-thread traffic goes through the
/// closeable inbox and is drained into these rings by the owner.
pub struct TaskRing<T> {
    items: VecDeque<T>,
}

impl<T> TaskRing<T> {
    /// Create an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append an item at the tail.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Take the item at the head.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for TaskRing<T> {
    fn default() -> Self {
        Self::new()
    }
}
