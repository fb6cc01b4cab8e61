//! End-to-end scenario tests for the weft task graph.
//!
//! These drive the public facade the way an engine frame would:
//! bursts of independent work, dependency chains, named-thread
//! round trips, and the parallel-for loop.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, Once};
    use std::time::Duration;

    use weft::{
        DispatchMode, NamedThreadId, SignalRef, SpinPolicy, TaskGraph, TaskPriority, ThreadTarget,
        ThreadTier,
    };
    use weft_sync::ManualResetEvent;

    fn init_logging() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "warn".into()),
                )
                .with_test_writer()
                .try_init();
        });
    }

    fn graph() -> TaskGraph {
        init_logging();
        TaskGraph::builder().build().unwrap()
    }

    #[test]
    fn burst_of_one_thousand_independent_tasks() {
        let graph = graph();
        let counter = Arc::new(AtomicUsize::new(0));
        let signals: Vec<SignalRef> = (0..1000)
            .map(|_| {
                let counter = Arc::clone(&counter);
                graph.spawn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        graph.wait_until_complete(&signals);
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
        graph.shutdown();
    }

    #[test]
    fn dependency_chain_observes_ordering() {
        let graph = graph();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut previous: Option<SignalRef> = None;
        for step in 0..20 {
            let log = Arc::clone(&log);
            let prerequisites: Vec<SignalRef> = previous.iter().cloned().collect();
            previous = Some(graph.spawn_after(&prerequisites, move |_| {
                log.lock().unwrap().push(step);
            }));
        }
        graph.wait_until_complete(&[previous.unwrap()]);
        assert_eq!(*log.lock().unwrap(), (0..20).collect::<Vec<_>>());
        graph.shutdown();
    }

    #[test]
    fn fan_in_joins_all_branches() {
        let graph = graph();
        let counter = Arc::new(AtomicUsize::new(0));
        let branches: Vec<SignalRef> = (0..16)
            .map(|_| {
                let counter = Arc::clone(&counter);
                graph.spawn(move |_| {
                    std::thread::sleep(Duration::from_micros(100));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        let observed = Arc::new(AtomicUsize::new(0));
        let join = {
            let counter = Arc::clone(&counter);
            let observed = Arc::clone(&observed);
            graph.spawn_after(&branches, move |_| {
                observed.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
            })
        };
        graph.wait_until_complete(&[join]);
        assert_eq!(observed.load(Ordering::SeqCst), 16);
        graph.shutdown();
    }

    #[test]
    fn named_thread_round_trip() {
        let graph = graph();
        graph.attach_named(NamedThreadId(0));

        // A worker task that posts its result back to the named
        // thread: the bread-and-butter engine pattern.
        let delivered = Arc::new(AtomicUsize::new(0));
        let finish = {
            let delivered = Arc::clone(&delivered);
            graph.spawn(move |ctx| {
                let delivered = Arc::clone(&delivered);
                let inner = weft::ClosureTask::new(move |ctx: &mut weft::TaskContext<'_>| {
                    assert_eq!(ctx.thread(), NamedThreadId(0).thread_id());
                    delivered.store(1, Ordering::SeqCst);
                });
                let signal = weft::CompletionSignal::new();
                ctx.submit(weft::TaskNode::with_signal(
                    Box::new(inner),
                    ThreadTarget::Named(NamedThreadId(0), TaskPriority::Normal),
                    Arc::clone(&signal),
                ));
                ctx.dont_complete_until(signal);
            })
        };
        graph.wait_until_complete(&[finish]);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        graph.shutdown();
    }

    #[test]
    fn high_priority_lane_overtakes_on_a_named_thread() {
        let graph = graph();
        graph.attach_named(NamedThreadId(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        for (tag, priority) in [(0, TaskPriority::Normal), (1, TaskPriority::High)] {
            let order = Arc::clone(&order);
            graph.spawn_on(
                ThreadTarget::Named(NamedThreadId(0), priority),
                move |_| {
                    order.lock().unwrap().push(tag);
                },
            );
        }
        graph.process_until_idle(NamedThreadId(0));
        assert_eq!(*order.lock().unwrap(), vec![1, 0]);
        graph.shutdown();
    }

    #[test]
    fn trigger_event_when_complete_latches() {
        let graph = graph();
        let event = Arc::new(ManualResetEvent::new());
        let gate = Arc::new(ManualResetEvent::new());
        let signal = {
            let gate = Arc::clone(&gate);
            graph.spawn(move |_| gate.wait())
        };
        graph.trigger_event_when_complete(Arc::clone(&event), &[signal]);
        assert!(!event.wait_timeout(Duration::from_millis(20)));
        gate.trigger();
        assert!(event.wait_timeout(Duration::from_secs(5)));
        graph.shutdown();
    }

    #[test]
    fn parallel_for_covers_every_index_once() {
        let graph = graph();
        let touched: Arc<Vec<AtomicUsize>> =
            Arc::new((0..4096).map(|_| AtomicUsize::new(0)).collect());
        graph.parallel_for(touched.len(), |index| {
            touched[index].fetch_add(1, Ordering::SeqCst);
        });
        assert!(touched.iter().all(|t| t.load(Ordering::SeqCst) == 1));
        graph.shutdown();
    }

    #[test]
    fn background_and_high_tier_submissions_run_everywhere() {
        init_logging();
        let graph = TaskGraph::builder()
            .high_tier(true)
            .background_tier(true)
            .workers_per_tier(2)
            .build()
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut signals = Vec::new();
        for tier in [ThreadTier::Normal, ThreadTier::High, ThreadTier::Background] {
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                signals.push(graph.spawn_on(
                    ThreadTarget::Any(tier, TaskPriority::Normal),
                    move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                ));
            }
        }
        graph.wait_until_complete(&signals);
        assert_eq!(counter.load(Ordering::SeqCst), 60);
        graph.shutdown();
    }

    #[test]
    fn locked_mode_and_spin_mode_run_the_same_workload() {
        init_logging();
        for (mode, spin) in [
            (DispatchMode::Locked, SpinPolicy::Block),
            (
                DispatchMode::Fast,
                SpinPolicy::Spin {
                    yield_each_pass: true,
                },
            ),
        ] {
            let graph = TaskGraph::builder()
                .dispatch_mode(mode)
                .spin(spin)
                .workers_per_tier(2)
                .build()
                .unwrap();
            let counter = Arc::new(AtomicUsize::new(0));
            let signals: Vec<SignalRef> = (0..300)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    graph.spawn(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();
            graph.wait_until_complete(&signals);
            assert_eq!(counter.load(Ordering::SeqCst), 300);
            graph.shutdown();
        }
    }

    #[test]
    fn tasks_spawned_from_tasks_complete() {
        let graph = graph();
        let counter = Arc::new(AtomicUsize::new(0));
        let signals: Vec<SignalRef> = (0..50)
            .map(|_| {
                let counter = Arc::clone(&counter);
                graph.spawn(move |ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let counter = Arc::clone(&counter);
                    let child = weft::ClosureTask::new(move |_: &mut weft::TaskContext<'_>| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                    let signal = weft::CompletionSignal::new();
                    ctx.submit(weft::TaskNode::with_signal(
                        Box::new(child),
                        ThreadTarget::any_normal(),
                        Arc::clone(&signal),
                    ));
                    ctx.dont_complete_until(signal);
                })
            })
            .collect();
        graph.wait_until_complete(&signals);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        graph.shutdown();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(8))]

            #[test]
            fn parallel_for_touches_each_index_for_any_count(count in 0usize..300) {
                init_logging();
                let graph = TaskGraph::builder().workers_per_tier(2).build().unwrap();
                let touched: Vec<AtomicUsize> =
                    (0..count).map(|_| AtomicUsize::new(0)).collect();
                graph.parallel_for(count, |index| {
                    touched[index].fetch_add(1, Ordering::SeqCst);
                });
                prop_assert!(touched.iter().all(|t| t.load(Ordering::SeqCst) == 1));
                graph.shutdown();
            }
        }
    }

    #[test]
    fn worker_count_is_always_at_least_one() {
        init_logging();
        let graph = TaskGraph::builder().single_threaded().build().unwrap();
        assert!(graph.worker_count() >= 1);
        graph.shutdown();

        let graph = TaskGraph::builder().workers_per_tier(3).build().unwrap();
        assert_eq!(graph.worker_count(), 3);
        graph.shutdown();
    }
}
