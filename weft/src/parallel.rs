//! Data-parallel index loops on top of the task graph.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use weft_core::{ClosureTask, Dispatcher, TaskNode, ThreadTarget};
use weft_sync::ManualResetEvent;

use crate::TaskGraph;

struct ParallelForState {
    next: AtomicUsize,
    remaining_tasks: AtomicUsize,
    count: usize,
    // Borrow of the caller's body with the lifetime erased. Sound
    // because the caller blocks on `done`, which triggers only after
    // every helper task has finished its claim loop, so nothing
    // touches the body after `parallel_for` returns.
    body: &'static (dyn Fn(usize) + Sync),
    done: ManualResetEvent,
}

fn claim_loop(state: &ParallelForState) {
    loop {
        let index = state.next.fetch_add(1, Ordering::Relaxed);
        if index >= state.count {
            break;
        }
        (state.body)(index);
    }
}

/// Run `body(0..count)` with every index executed exactly once,
/// spread across the normal-tier workers and the calling thread.
///
/// Zero indices is a no-op. A single index, a single-threaded graph,
/// or `force_single_thread` runs the loop inline on the caller. The
/// call returns only after every index has run and every spawned
/// helper task has finished.
pub fn parallel_for<F>(graph: &TaskGraph, count: usize, body: F, force_single_thread: bool)
where
    F: Fn(usize) + Sync,
{
    if count == 0 {
        return;
    }
    let inline =
        force_single_thread || count == 1 || !graph.pool().capabilities().multithreading;
    if inline {
        for index in 0..count {
            body(index);
        }
        return;
    }

    // The caller participates, so one fewer helper than indices.
    let helpers = graph.worker_count().min(count - 1);
    let body_ref: &(dyn Fn(usize) + Sync) = &body;
    let body_static: &'static (dyn Fn(usize) + Sync) =
        unsafe { std::mem::transmute(body_ref) };
    let state = Arc::new(ParallelForState {
        next: AtomicUsize::new(0),
        remaining_tasks: AtomicUsize::new(helpers),
        count,
        body: body_static,
        done: ManualResetEvent::new(),
    });

    for _ in 0..helpers {
        let state = Arc::clone(&state);
        let task = ClosureTask::new(move |_ctx| {
            claim_loop(&state);
            if state.remaining_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
                state.done.trigger();
            }
        });
        graph
            .pool()
            .submit(TaskNode::detached(Box::new(task), ThreadTarget::any_normal()));
    }

    claim_loop(&state);
    state.done.wait();
}
