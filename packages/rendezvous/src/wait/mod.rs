//! Blocking wait/notify services.
//!
//! The barrier and latch cores never park threads themselves. When spinning on a word is not
//! enough they hand the word to a [`WaitService`], which blocks until the word changes and wakes
//! every blocked thread on request.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::config::{Config, WaitStrategy};

pub mod backoff;
pub mod park;

pub use backoff::BackoffWait;
pub use park::ParkingWait;

/// An atomic integer a [`WaitService`] can block on.
pub trait AtomicWord: Send + Sync {
    type Value: Copy + Eq + std::fmt::Debug;

    fn load_word(&self, ordering: Ordering) -> Self::Value;

    /// Address of the word, used as the wait key.
    fn address(&self) -> usize;
}

macro_rules! impl_atomic_word {
    ($atomic:ty, $value:ty $(,)?) => {
        impl AtomicWord for $atomic {
            type Value = $value;

            fn load_word(&self, ordering: Ordering) -> $value {
                self.load(ordering)
            }

            fn address(&self) -> usize {
                std::ptr::from_ref(self).addr()
            }
        }
    };
}

impl_atomic_word!(AtomicU32, u32);
impl_atomic_word!(AtomicU64, u64);
impl_atomic_word!(AtomicUsize, usize);

pub trait WaitService: Send + Sync {
    /// Blocks while `word` (loaded with `ordering`) still holds `observed`.
    ///
    /// May return spuriously. Callers re-check their condition in a loop.
    fn wait_on_word<W: AtomicWord>(&self, word: &W, observed: W::Value, ordering: Ordering);

    /// Wakes every thread blocked on `word`.
    fn notify_all<W: AtomicWord>(&self, word: &W);
}

/// The wait service picked by [`Config::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfiguredWait {
    Park(ParkingWait),
    Backoff(BackoffWait),
}

impl ConfiguredWait {
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        match config.wait {
            WaitStrategy::Park => Self::Park(ParkingWait::new()),
            WaitStrategy::Backoff => Self::Backoff(BackoffWait::new(config.backoff)),
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> WaitStrategy {
        match self {
            Self::Park(..) => WaitStrategy::Park,
            Self::Backoff(..) => WaitStrategy::Backoff,
        }
    }
}

impl Default for ConfiguredWait {
    fn default() -> Self {
        Self::Park(ParkingWait::new())
    }
}

impl WaitService for ConfiguredWait {
    fn wait_on_word<W: AtomicWord>(&self, word: &W, observed: W::Value, ordering: Ordering) {
        match self {
            Self::Park(service) => service.wait_on_word(word, observed, ordering),
            Self::Backoff(service) => service.wait_on_word(word, observed, ordering),
        }
    }

    fn notify_all<W: AtomicWord>(&self, word: &W) {
        match self {
            Self::Park(service) => service.notify_all(word),
            Self::Backoff(service) => service.notify_all(word),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::BackoffConfig;

    #[test_log::test]
    fn from_config_follows_wait_strategy() {
        let park = ConfiguredWait::from_config(&Config::default());
        let backoff = ConfiguredWait::from_config(&Config::default().with_wait(WaitStrategy::Backoff));

        assert_eq!(park.strategy(), WaitStrategy::Park);
        assert_eq!(backoff, ConfiguredWait::Backoff(BackoffWait::new(BackoffConfig::new())));
    }

    #[test_log::test]
    fn distinct_words_have_distinct_addresses() {
        let a = AtomicU32::new(0);
        let b = AtomicU32::new(0);

        assert_ne!(a.address(), b.address());
        assert_eq!(a.address(), a.address());
    }

    #[test_log::test]
    fn load_word_reads_through() {
        let word = AtomicU64::new(42);

        assert_eq!(word.load_word(Ordering::Acquire), 42);
    }
}
