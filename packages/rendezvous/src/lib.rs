//! Thread rendezvous primitives.
//!
//! This crate provides two in-process coordination primitives for ordinary OS threads:
//!
//! * [`Barrier`] - a reusable N-party rendezvous with an optional completion action that runs
//!   exactly once per phase
//! * [`Latch`] - a one-shot countdown gate
//!
//! Arrivals never take a lock. The barrier is backed by one of two interchangeable strategies,
//! chosen explicitly through [`Config`]: a single packed atomic word for the plain case, or a
//! combining tree of ticket slots that bounds contention to `O(log N)` per arrival and hosts the
//! completion action. Blocking is delegated to a [`WaitService`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::{
//!     Arc,
//!     atomic::{AtomicUsize, Ordering},
//! };
//! use switchy_rendezvous::Barrier;
//!
//! let phases = Arc::new(AtomicUsize::new(0));
//! let barrier = {
//!     let phases = phases.clone();
//!     Barrier::with_completion(4, move || {
//!         phases.fetch_add(1, Ordering::Relaxed);
//!     })
//! };
//!
//! std::thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             for _ in 0..3 {
//!                 barrier.arrive_and_wait();
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(phases.load(Ordering::Relaxed), 3);
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    collections::TryReserveError,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;

pub mod barrier;
pub mod config;
pub mod env;
pub mod latch;
pub mod wait;

pub use barrier::{ArrivalToken, BackendKind, Barrier, BarrierBuilder, BarrierWaitResult};
pub use config::{BackoffConfig, BarrierStrategy, Config, LeafSelection, WaitStrategy};
pub use latch::Latch;
pub use wait::{AtomicWord, BackoffWait, ConfiguredWait, ParkingWait, WaitService};

static THREAD_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
}

/// Identity of the calling thread.
///
/// Allocated from a process-wide counter the first time a thread asks for it and cached for the
/// rest of that thread's life. Never reused while the process runs.
#[must_use]
pub fn thread_id() -> u64 {
    THREAD_ID.with(|x| *x)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Expected participant count must be positive")]
    ZeroParticipants,
    #[error("Expected participant count {expected} exceeds the maximum of {max}")]
    TooManyParticipants { expected: usize, max: usize },
    #[error("A completion action requires the tree barrier backend")]
    CompletionRequiresTree,
    #[error(transparent)]
    Allocation(#[from] TryReserveError),
    #[error(transparent)]
    Env(#[from] env::EnvError),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn thread_id_is_stable_within_a_thread() {
        assert_eq!(thread_id(), thread_id());
    }

    #[test_log::test]
    fn thread_id_differs_between_threads() {
        let here = thread_id();
        let there = std::thread::spawn(thread_id).join().unwrap();

        assert_ne!(here, there);
    }
}
