//! Lock-free containers used by the schedulers.
//!
//! Three shapes live here:
//!
//! - [`LockFreeStack`]: a Treiber stack, the building block for free
//!   lists and wake hints.
//! - [`ClosableList`]: a Treiber stack whose head can also hold a
//!   CLOSED sentinel. A closed list refuses plain pushes, and a push
//!   that reopens it tells the producer so exactly one producer takes
//!   on the wake obligation. This is the cross-thread inbox and the
//!   subsequent list of a completion signal.
//! - [`MpmcQueue`]: a bounded sequence-numbered ring with a locked
//!   overflow queue behind it, so pushes never fail.

use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

/// A lock-free LIFO stack.
pub struct LockFreeStack<T> {
    head: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for LockFreeStack<T> {}
unsafe impl<T: Send> Sync for LockFreeStack<T> {}

impl<T> LockFreeStack<T> {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Push a value.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            unsafe { (*node).next = head };
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Pop the most recently pushed value.
    pub fn pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            let next = unsafe { (*head).next };
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let node = unsafe { Box::from_raw(head) };
                return Some(node.value);
            }
        }
    }

    /// Detach the whole stack and return its values in push order
    /// (oldest first).
    pub fn pop_all(&self) -> Vec<T> {
        let mut head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut values = Vec::new();
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
            values.push(node.value);
        }
        values.reverse();
        values
    }

    /// Whether the stack is empty right now.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
        }
    }
}

/// A lock-free list that can be closed.
///
/// The head pointer has three states: null (open and empty), a node
/// chain (open, non-empty), or a CLOSED sentinel (closed and empty).
/// A list only closes while empty; draining never silently reopens a
/// closed list.
pub struct ClosableList<T> {
    head: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for ClosableList<T> {}
unsafe impl<T: Send> Sync for ClosableList<T> {}

impl<T> ClosableList<T> {
    fn closed() -> *mut Node<T> {
        1usize as *mut Node<T>
    }

    /// Create an open, empty list.
    #[must_use]
    pub fn new_open() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Create a closed list.
    #[must_use]
    pub fn new_closed() -> Self {
        Self {
            head: AtomicPtr::new(Self::closed()),
        }
    }

    /// Whether the list is currently closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.head.load(Ordering::Acquire) == Self::closed()
    }

    /// Whether the list currently holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        head.is_null() || head == Self::closed()
    }

    /// Push a value onto an open list.
    ///
    /// Returns the value back if the list is closed; the caller then
    /// owns whatever obligation the push carried.
    pub fn push_if_open(&self, value: T) -> Result<(), T> {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head == Self::closed() {
                let node = unsafe { Box::from_raw(node) };
                return Err(node.value);
            }
            unsafe { (*node).next = head };
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Push a value, reopening the list if it was closed.
    ///
    /// Returns `true` when this call is the one that reopened the
    /// list. Exactly one producer sees `true` per close, which makes
    /// it the single producer responsible for waking the consumer.
    pub fn reopen_if_closed_and_push(&self, value: T) -> bool {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            let was_closed = head == Self::closed();
            unsafe { (*node).next = if was_closed { ptr::null_mut() } else { head } };
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return was_closed;
            }
        }
    }

    /// Close the list if it is empty. Returns `true` on success; a
    /// non-empty or already closed list is left untouched.
    pub fn close_if_empty(&self) -> bool {
        self.head
            .compare_exchange(
                ptr::null_mut(),
                Self::closed(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Drain every value, oldest push first, leaving the list open.
    /// A closed list drains nothing and stays closed.
    pub fn take_all(&self) -> Vec<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head == Self::closed() || head.is_null() {
                return Vec::new();
            }
            if self
                .head
                .compare_exchange_weak(head, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Self::collect(head);
            }
        }
    }

    /// Atomically drain every value and close the list, oldest push
    /// first. Pushes that lost the race to this close are refused by
    /// [`push_if_open`](Self::push_if_open), so each value is either
    /// captured here or returned to its producer, never both.
    pub fn take_all_and_close(&self) -> Vec<T> {
        let head = self.head.swap(Self::closed(), Ordering::AcqRel);
        if head == Self::closed() {
            return Vec::new();
        }
        Self::collect(head)
    }

    /// Reopen a uniquely owned list. The list must be empty.
    pub fn reset_open(&mut self) {
        let head = *self.head.get_mut();
        debug_assert!(head.is_null() || head == Self::closed());
        *self.head.get_mut() = ptr::null_mut();
    }

    fn collect(mut head: *mut Node<T>) -> Vec<T> {
        let mut values = Vec::new();
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
            values.push(node.value);
        }
        values.reverse();
        values
    }
}

impl<T> Drop for ClosableList<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        if head == Self::closed() {
            return;
        }
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
        }
    }
}

/// Default ring capacity for [`MpmcQueue`]. Must be a power of two.
const RING_CAPACITY: usize = 1024;

struct Slot<T> {
    sequence: AtomicUsize,
    value: std::cell::UnsafeCell<std::mem::MaybeUninit<T>>,
}

/// A multi-producer multi-consumer FIFO queue.
///
/// The common path is a bounded lock-free ring; when the ring fills,
/// values spill into a mutex-guarded overflow queue so a push never
/// fails. While the overflow holds values, new pushes join it to keep
/// dequeue order consistent with enqueue order.
pub struct MpmcQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
    overflow: Mutex<VecDeque<T>>,
    overflow_len: AtomicUsize,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a queue with the default ring capacity.
    #[must_use]
    pub fn new() -> Self {
        let buffer: Box<[Slot<T>]> = (0..RING_CAPACITY)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: std::cell::UnsafeCell::new(std::mem::MaybeUninit::uninit()),
            })
            .collect();
        Self {
            buffer,
            mask: RING_CAPACITY - 1,
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
            overflow: Mutex::new(VecDeque::new()),
            overflow_len: AtomicUsize::new(0),
        }
    }

    /// Push a value. Never fails; spills to the overflow queue when
    /// the ring is full.
    pub fn push(&self, value: T) {
        if self.overflow_len.load(Ordering::Acquire) > 0 {
            self.push_overflow(value);
            return;
        }
        if let Err(value) = self.try_push_ring(value) {
            self.push_overflow(value);
        }
    }

    fn push_overflow(&self, value: T) {
        let mut overflow = self.overflow.lock().unwrap_or_else(|e| e.into_inner());
        overflow.push_back(value);
        self.overflow_len.store(overflow.len(), Ordering::Release);
    }

    fn try_push_ring(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop the oldest value, if any.
    pub fn pop(&self) -> Option<T> {
        if let Some(value) = self.try_pop_ring() {
            return Some(value);
        }
        if self.overflow_len.load(Ordering::Acquire) > 0 {
            let mut overflow = self.overflow.lock().unwrap_or_else(|e| e.into_inner());
            let value = overflow.pop_front();
            self.overflow_len.store(overflow.len(), Ordering::Release);
            return value;
        }
        None
    }

    fn try_pop_ring(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Whether the queue looks empty. Racy by nature; only a hint for
    /// stall decisions, which re-check after publishing their intent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enqueue_pos.load(Ordering::Acquire) == self.dequeue_pos.load(Ordering::Acquire)
            && self.overflow_len.load(Ordering::Acquire) == 0
    }
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn stack_pops_in_lifo_order() {
        let stack = LockFreeStack::new();
        stack.push(1);
        stack.push(2);
        stack.push(3);
        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn stack_pop_all_returns_push_order() {
        let stack = LockFreeStack::new();
        for i in 0..5 {
            stack.push(i);
        }
        assert_eq!(stack.pop_all(), vec![0, 1, 2, 3, 4]);
        assert!(stack.is_empty());
    }

    #[test]
    fn closable_list_basic_protocol() {
        let list = ClosableList::new_open();
        assert!(list.push_if_open(1).is_ok());
        assert!(!list.close_if_empty());
        assert_eq!(list.take_all(), vec![1]);
        assert!(list.close_if_empty());
        assert!(list.is_closed());
        assert_eq!(list.push_if_open(2), Err(2));
    }

    #[test]
    fn reopen_reports_exactly_the_reopening_push() {
        let list = ClosableList::new_closed();
        assert!(list.reopen_if_closed_and_push(1));
        assert!(!list.reopen_if_closed_and_push(2));
        assert_eq!(list.take_all(), vec![1, 2]);
    }

    #[test]
    fn take_all_and_close_captures_and_closes() {
        let list = ClosableList::new_open();
        list.push_if_open(1).unwrap();
        list.push_if_open(2).unwrap();
        assert_eq!(list.take_all_and_close(), vec![1, 2]);
        assert!(list.is_closed());
        assert_eq!(list.take_all_and_close(), Vec::<i32>::new());
    }

    #[test]
    fn take_all_leaves_closed_list_closed() {
        let list: ClosableList<i32> = ClosableList::new_closed();
        assert_eq!(list.take_all(), Vec::<i32>::new());
        assert!(list.is_closed());
    }

    #[test]
    fn every_push_is_captured_or_refused_exactly_once() {
        let list = Arc::new(ClosableList::new_open());
        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        let refused = Arc::new(std::sync::Mutex::new(Vec::new()));

        let pushers: Vec<_> = (0..4)
            .map(|t| {
                let list = Arc::clone(&list);
                let refused = Arc::clone(&refused);
                thread::spawn(move || {
                    for i in 0..250 {
                        if let Err(v) = list.push_if_open(t * 1000 + i) {
                            refused.lock().unwrap().push(v);
                        }
                    }
                })
            })
            .collect();

        let closer = {
            let list = Arc::clone(&list);
            let captured = Arc::clone(&captured);
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_micros(200));
                captured.lock().unwrap().extend(list.take_all_and_close());
            })
        };

        for p in pushers {
            p.join().unwrap();
        }
        closer.join().unwrap();

        let mut all: Vec<i32> = captured.lock().unwrap().clone();
        all.extend(refused.lock().unwrap().iter().copied());
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn queue_is_fifo_single_thread() {
        let queue = MpmcQueue::new();
        for i in 0..10 {
            queue.push(i);
        }
        for i in 0..10 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn queue_spills_past_ring_capacity_without_loss() {
        let queue = MpmcQueue::new();
        let total = RING_CAPACITY + 500;
        for i in 0..total {
            queue.push(i);
        }
        let mut popped = Vec::with_capacity(total);
        while let Some(v) = queue.pop() {
            popped.push(v);
        }
        assert_eq!(popped.len(), total);
        assert_eq!(popped, (0..total).collect::<Vec<_>>());
    }

    proptest::proptest! {
        // Compare against a VecDeque model over arbitrary interleaved
        // push/pop sequences, including ones that wrap the ring.
        #[test]
        fn queue_matches_a_fifo_model(ops in proptest::collection::vec(
            proptest::prelude::any::<Option<u16>>(),
            0..400,
        )) {
            let queue = MpmcQueue::new();
            let mut model = VecDeque::new();
            for op in ops {
                match op {
                    Some(value) => {
                        queue.push(value);
                        model.push_back(value);
                    }
                    None => {
                        proptest::prop_assert_eq!(queue.pop(), model.pop_front());
                    }
                }
            }
            while let Some(expected) = model.pop_front() {
                proptest::prop_assert_eq!(queue.pop(), Some(expected));
            }
            proptest::prop_assert_eq!(queue.pop(), None);
        }
    }

    #[test]
    fn queue_survives_producer_consumer_contention() {
        let queue = Arc::new(MpmcQueue::new());
        let total = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..2000usize {
                        queue.push(i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    let mut seen = 0;
                    while seen < 2000 {
                        if queue.pop().is_some() {
                            seen += 1;
                        } else {
                            thread::yield_now();
                        }
                    }
                    total.fetch_add(seen, Ordering::SeqCst);
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        for c in consumers {
            c.join().unwrap();
        }
        assert_eq!(total.load(Ordering::SeqCst), 6000);
        assert!(queue.pop().is_none());
    }
}
