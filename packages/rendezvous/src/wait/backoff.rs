//! Poll-with-backoff waiting.
//!
//! Nothing is ever parked, so `notify_all` has nothing to do. A waiter spins with an exponentially
//! growing number of spin hints, then yields its time slice, then sleeps for growing intervals
//! capped at `max_sleep`.

use std::{hint, sync::atomic::Ordering, thread, time::Duration};

use super::{AtomicWord, WaitService};
use crate::config::BackoffConfig;

const MAX_SPIN_SHIFT: u32 = 6;
const MIN_SLEEP: Duration = Duration::from_micros(1);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackoffWait {
    config: BackoffConfig,
}

impl BackoffWait {
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl WaitService for BackoffWait {
    fn wait_on_word<W: AtomicWord>(&self, word: &W, observed: W::Value, ordering: Ordering) {
        let mut backoff = Backoff::new(&self.config);
        while word.load_word(ordering) == observed {
            backoff.snooze();
        }
    }

    fn notify_all<W: AtomicWord>(&self, _word: &W) {}
}

struct Backoff<'a> {
    config: &'a BackoffConfig,
    step: u32,
    sleep: Duration,
}

impl<'a> Backoff<'a> {
    const fn new(config: &'a BackoffConfig) -> Self {
        Self {
            config,
            step: 0,
            sleep: MIN_SLEEP,
        }
    }

    fn snooze(&mut self) {
        let yield_until = self.config.spin_limit.saturating_add(self.config.yield_limit);

        if self.step < self.config.spin_limit {
            for _ in 0..1_u32 << self.step.min(MAX_SPIN_SHIFT) {
                hint::spin_loop();
            }
        } else if self.step < yield_until {
            thread::yield_now();
        } else {
            thread::sleep(self.sleep.min(self.config.max_sleep));
            self.sleep = self.sleep.saturating_mul(2);
        }

        self.step = self.step.saturating_add(1);
    }
}
