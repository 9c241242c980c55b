//! One-shot countdown latch.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    Error,
    config::Config,
    wait::{ConfiguredWait, WaitService},
};

/// A single-use gate that opens once its counter reaches zero.
///
/// Threads call [`Latch::count_down`] to decrement the counter and [`Latch::wait`] to block until
/// it hits zero. Once open, the latch stays open: every later `wait` returns immediately and
/// [`Latch::try_wait`] keeps returning `true`.
///
/// Counting below zero is a caller error. It is caught by a debug assertion and is otherwise
/// unchecked.
///
/// # Examples
///
/// ```rust
/// use switchy_rendezvous::Latch;
///
/// let latch = Latch::new(3);
///
/// std::thread::scope(|s| {
///     for _ in 0..3 {
///         s.spawn(|| latch.count_down());
///     }
///     latch.wait();
/// });
///
/// assert!(latch.try_wait());
/// ```
pub struct Latch<S: WaitService = ConfiguredWait> {
    counter: AtomicUsize,
    service: S,
}

impl Latch {
    /// Creates a latch that opens after `expected` count-downs.
    ///
    /// # Panics
    ///
    /// * If `expected` is 0
    #[must_use]
    pub fn new(expected: usize) -> Self {
        assert!(expected > 0, "latch count must be positive");

        Self::with_service(expected, ConfiguredWait::default())
    }

    /// Creates a latch that opens after `expected` count-downs, rejecting a zero count.
    ///
    /// # Errors
    ///
    /// * If `expected` is 0
    pub fn try_new(expected: usize) -> Result<Self, Error> {
        Self::try_with_service(expected, ConfiguredWait::default())
    }

    /// Creates a latch that blocks through the wait strategy named in `config`.
    ///
    /// # Errors
    ///
    /// * If `expected` is 0
    pub fn from_config(expected: usize, config: &Config) -> Result<Self, Error> {
        Self::try_with_service(expected, ConfiguredWait::from_config(config))
    }

    /// Largest supported initial count.
    #[must_use]
    pub const fn max() -> usize {
        usize::MAX
    }
}

impl<S: WaitService> Latch<S> {
    fn with_service(expected: usize, service: S) -> Self {
        log::debug!("Creating latch: expected={expected}");

        Self {
            counter: AtomicUsize::new(expected),
            service,
        }
    }

    /// Creates a latch that blocks through the given wait service.
    ///
    /// # Errors
    ///
    /// * If `expected` is 0
    pub fn try_with_service(expected: usize, service: S) -> Result<Self, Error> {
        if expected == 0 {
            return Err(Error::ZeroParticipants);
        }

        Ok(Self::with_service(expected, service))
    }

    /// Decrements the counter by one without blocking.
    pub fn count_down(&self) {
        self.count_down_by(1);
    }

    /// Decrements the counter by `update` without blocking, opening the latch if it reaches zero.
    pub fn count_down_by(&self, update: usize) {
        let previous = self.counter.fetch_sub(update, Ordering::Release);
        debug_assert!(
            previous >= update,
            "latch counted down by {update} with only {previous} outstanding"
        );

        if previous == update {
            log::trace!("Latch reached zero");
            self.service.notify_all(&self.counter);
        }
    }

    /// Returns `true` once the counter has reached zero. Never blocks.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.counter.load(Ordering::Acquire) == 0
    }

    /// Blocks until the counter reaches zero.
    pub fn wait(&self) {
        loop {
            let current = self.counter.load(Ordering::Acquire);
            if current == 0 {
                return;
            }
            self.service
                .wait_on_word(&self.counter, current, Ordering::Acquire);
        }
    }

    /// Counts down by one, then waits for the latch to open.
    pub fn arrive_and_wait(&self) {
        self.arrive_and_wait_by(1);
    }

    /// Counts down by `update`, then waits for the latch to open.
    pub fn arrive_and_wait_by(&self, update: usize) {
        self.count_down_by(update);
        self.wait();
    }

    /// Count-downs still outstanding.
    #[must_use]
    pub fn count(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }
}

impl<S: WaitService> fmt::Debug for Latch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
