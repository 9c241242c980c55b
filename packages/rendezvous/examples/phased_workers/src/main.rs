#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Phased worker example for `switchy_rendezvous`.
//!
//! A pool of worker threads repeatedly halves the values in a shared table. Each phase every
//! worker updates its own slice, then meets the others at a [`Barrier`] whose completion action
//! sums the table before the next phase starts. A [`Latch`] holds the workers until the table is
//! seeded.
//!
//! The barrier and latch honor the `SWITCHY_RENDEZVOUS_*` environment variables, so running with
//! `SWITCHY_RENDEZVOUS_BARRIER_STRATEGY=TREE SWITCHY_RENDEZVOUS_WAIT_STRATEGY=BACKOFF` exercises
//! the alternate strategies.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use switchy_rendezvous::{Barrier, Config, Error, Latch};

const WORKERS: usize = 4;
const SLOTS_PER_WORKER: usize = 8;
const PHASES: usize = 5;

fn sum(table: &[AtomicU64]) -> u64 {
    table.iter().map(|x| x.load(Ordering::Relaxed)).sum()
}

/// Entry point for the phased workers example.
///
/// # Errors
///
/// * If the `SWITCHY_RENDEZVOUS_*` environment variables hold invalid values
/// * If the barrier cannot be built for the configured strategy
///
/// # Panics
///
/// * If a worker thread panics
fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let config = Config::from_env()?;
    log::info!("Running {WORKERS} workers for {PHASES} phases with {config:?}");

    let table: Arc<Vec<AtomicU64>> = Arc::new(
        (0..WORKERS * SLOTS_PER_WORKER)
            .map(|_| AtomicU64::new(0))
            .collect(),
    );

    let barrier = {
        let table = table.clone();
        Barrier::builder(WORKERS)
            .config(config)
            .completion(move || {
                log::info!("Phase complete: total={}", sum(&table));
            })
            .build()?
    };
    log::debug!("Built {} barrier: {barrier:?}", barrier.backend_kind());

    let seeded = Latch::from_config(1, &config)?;

    std::thread::scope(|s| {
        for worker in 0..WORKERS {
            let table = &table;
            let barrier = &barrier;
            let seeded = &seeded;

            s.spawn(move || {
                seeded.wait();

                let slots = &table[worker * SLOTS_PER_WORKER..(worker + 1) * SLOTS_PER_WORKER];
                for phase in 0..PHASES {
                    for slot in slots {
                        let value = slot.load(Ordering::Relaxed);
                        slot.store(value / 2, Ordering::Relaxed);
                    }

                    if barrier.arrive_and_wait().is_leader() {
                        log::debug!("Worker {worker} led phase {phase}");
                    }
                }
            });
        }

        for (i, slot) in table.iter().enumerate() {
            slot.store(1024 * (i as u64 + 1), Ordering::Relaxed);
        }
        log::info!("Seeded table: total={}", sum(&table));
        seeded.count_down();
    });

    println!("Final total after {PHASES} phases: {}", sum(&table));

    Ok(())
}
