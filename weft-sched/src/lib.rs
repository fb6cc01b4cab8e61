//! Scheduling structures for the weft task graph.
//!
//! Each worker tier runs a [`TierScheduler`]: a pair of global queue
//! lanes plus the bookkeeping that decides when workers stall and who
//! gets woken. Named threads use the simpler [`TaskRing`] lanes owned
//! by a single thread.
//!
//! The schedulers here hold no threads and trigger no events. They
//! return wake directives ([`WakeWorker`]) and stall directives and
//! leave the actual waking to the executor, which keeps every state
//! transition testable from a single thread.

#![warn(missing_docs)]

pub mod ring;
pub mod state;
pub mod tier;

pub use ring::TaskRing;
pub use state::{TierState, WorkerStateMask};
pub use tier::{FindWork, TierScheduler, WakeWorker};
