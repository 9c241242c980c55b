//! Reusable N-party barrier.
//!
//! [`Barrier`] is a thin facade over one of two backends implementing [`BarrierBackend`]:
//!
//! * [`centralized::CentralizedBarrier`] - the whole state in one packed atomic word; used when
//!   there is no completion action
//! * [`tree::TreeBarrier`] - a combining tree of ticket slots with `O(log N)` contention per
//!   arrival; hosts the completion action
//!
//! The backend is chosen at construction from [`Config::strategy`].

use std::fmt;

use strum_macros::{AsRefStr, EnumString};

use crate::{
    Error,
    config::{BarrierStrategy, Config, LeafSelection, WaitStrategy},
    wait::{ConfiguredWait, WaitService},
};

pub mod centralized;
pub mod completion;
pub mod tree;

use centralized::CentralizedBarrier;
use completion::Completion;
use tree::TreeBarrier;

/// The phase a participant observed when it arrived.
///
/// Pass it to [`Barrier::wait`] to block until that phase is over. A token whose phase has already
/// passed, however many generations ago, makes `wait` return immediately.
#[must_use = "an arrival token does nothing unless passed to `wait`"]
#[derive(Debug, PartialEq, Eq)]
pub struct ArrivalToken {
    phase: u32,
    leader: bool,
}

impl ArrivalToken {
    pub(crate) const fn new(phase: u32, leader: bool) -> Self {
        Self { phase, leader }
    }

    pub(crate) const fn phase(&self) -> u32 {
        self.phase
    }

    /// Returns `true` if this arrival completed its generation.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.leader
    }
}

/// A result returned from [`Barrier::arrive_and_wait`] when all participants have rendezvoused.
#[derive(Clone, Debug)]
pub struct BarrierWaitResult {
    is_leader: bool,
}

impl BarrierWaitResult {
    /// Returns `true` if this participant completed the phase.
    ///
    /// Only one participant per phase gets `true`; it is the one that ran the completion action.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.is_leader
    }
}

/// The backend a [`Barrier`] was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendKind {
    /// Single packed atomic word.
    Centralized,
    /// Combining tree of ticket slots.
    Tree,
}

impl BackendKind {
    /// Largest expected count this backend supports.
    #[must_use]
    pub const fn max(self) -> usize {
        match self {
            Self::Centralized => centralized::MAX,
            Self::Tree => tree::MAX,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// The contract both barrier backends implement.
pub trait BarrierBackend: Send + Sync + fmt::Debug {
    /// Records `update` arrivals without blocking.
    fn arrive(&self, update: usize) -> ArrivalToken;

    /// Blocks until the phase captured in `token` has passed.
    fn wait(&self, token: ArrivalToken);

    /// Records one arrival and removes one participant from every later generation.
    fn arrive_and_drop(&self);

    /// Participants expected from the next generation on, counting drops not yet folded in.
    fn expected(&self) -> usize;

    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Largest expected count this backend supports.
    fn max(&self) -> usize;
}

enum Backend<S: WaitService> {
    Centralized(CentralizedBarrier<S>),
    Tree(TreeBarrier<S>),
}

impl<S: WaitService> Backend<S> {
    fn get(&self) -> &dyn BarrierBackend {
        match self {
            Self::Centralized(backend) => backend,
            Self::Tree(backend) => backend,
        }
    }
}

/// A barrier enables multiple threads to synchronize the beginning of some computation.
///
/// Each participant calls [`Barrier::arrive_and_wait`] (or [`Barrier::arrive`] followed later by
/// [`Barrier::wait`]) once per phase. When the last expected participant arrives, the completion
/// action (if any) runs on that participant's thread, the phase advances and every waiter is
/// released. The barrier then immediately accepts arrivals for the next phase.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use switchy_rendezvous::Barrier;
///
/// let barrier = Arc::new(Barrier::new(10));
/// let handles: Vec<_> = (0..10)
///     .map(|_| {
///         let barrier = barrier.clone();
///         std::thread::spawn(move || barrier.arrive_and_wait())
///     })
///     .collect();
///
/// let leaders = handles
///     .into_iter()
///     .map(|handle| handle.join().unwrap())
///     .filter(|result| result.is_leader())
///     .count();
///
/// // Exactly one participant completes the phase
/// assert_eq!(leaders, 1);
/// ```
pub struct Barrier<S: WaitService = ConfiguredWait> {
    backend: Backend<S>,
}

impl Barrier {
    /// Creates a barrier for `expected` participants with the default configuration.
    ///
    /// # Panics
    ///
    /// * If `expected` is 0
    /// * If `expected` exceeds the tree backend's maximum
    /// * If the ticket arena cannot be allocated
    #[must_use]
    pub fn new(expected: usize) -> Self {
        match Self::try_new(expected) {
            Ok(barrier) => barrier,
            Err(e) => panic!("Failed to create barrier: {e}"),
        }
    }

    /// Creates a barrier for `expected` participants that runs `completion` once per phase.
    ///
    /// # Panics
    ///
    /// * If `expected` is 0
    /// * If `expected` exceeds the tree backend's maximum
    /// * If the ticket arena cannot be allocated
    #[must_use]
    pub fn with_completion<F>(expected: usize, completion: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        match Self::builder(expected).completion(completion).build() {
            Ok(barrier) => barrier,
            Err(e) => panic!("Failed to create barrier: {e}"),
        }
    }

    /// Creates a barrier for `expected` participants, returning construction failures.
    ///
    /// # Errors
    ///
    /// * If `expected` is 0
    /// * If `expected` exceeds the tree backend's maximum
    /// * If the ticket arena cannot be allocated
    pub fn try_new(expected: usize) -> Result<Self, Error> {
        Self::builder(expected).build()
    }

    /// Starts a [`BarrierBuilder`] for `expected` participants.
    #[must_use]
    pub fn builder(expected: usize) -> BarrierBuilder {
        BarrierBuilder::new(expected)
    }
}

impl<S: WaitService> Barrier<S> {
    /// Arrives once without blocking and returns the token for the phase arrived at.
    pub fn arrive(&self) -> ArrivalToken {
        self.arrive_by(1)
    }

    /// Records `update` arrivals at once.
    ///
    /// The caller must not arrive more times than the phase still expects.
    pub fn arrive_by(&self, update: usize) -> ArrivalToken {
        self.backend.get().arrive(update)
    }

    /// Blocks until the phase captured in `token` has completed.
    ///
    /// Only checks whether the phase has moved on, so a token from a phase that completed long ago
    /// returns immediately.
    pub fn wait(&self, token: ArrivalToken) {
        self.backend.get().wait(token);
    }

    /// Arrives and blocks until every participant of this phase has arrived.
    pub fn arrive_and_wait(&self) -> BarrierWaitResult {
        let token = self.arrive();
        let is_leader = token.is_leader();
        self.wait(token);

        BarrierWaitResult { is_leader }
    }

    /// Arrives for the current phase and leaves the barrier for good.
    ///
    /// The expected count drops by one starting with the next phase. The caller must not arrive
    /// again.
    pub fn arrive_and_drop(&self) {
        self.backend.get().arrive_and_drop();
    }

    /// Participants expected from the next phase on.
    #[must_use]
    pub fn expected(&self) -> usize {
        self.backend.get().expected()
    }

    /// Which backend this barrier was built with.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.get().kind()
    }

    /// Largest expected count the chosen backend supports.
    #[must_use]
    pub fn max(&self) -> usize {
        self.backend.get().max()
    }
}

impl<S: WaitService> fmt::Debug for Barrier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Barrier").field(self.backend.get()).finish()
    }
}

/// Configures and builds a [`Barrier`].
#[must_use]
pub struct BarrierBuilder {
    expected: usize,
    config: Config,
    completion: Completion,
}

impl BarrierBuilder {
    /// Starts a builder for `expected` participants with the default configuration.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            config: Config::default(),
            completion: Completion::noop(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets which backend to build.
    pub fn strategy(mut self, strategy: BarrierStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Sets how arrivals pick their starting leaf in the tree backend.
    pub fn leaf_selection(mut self, leaf_selection: LeafSelection) -> Self {
        self.config.leaf_selection = leaf_selection;
        self
    }

    /// Sets how blocked participants wait for the phase to advance.
    pub fn wait_strategy(mut self, wait: WaitStrategy) -> Self {
        self.config.wait = wait;
        self
    }

    /// Sets the action run once per phase by the participant that completes it.
    ///
    /// Requires the tree backend.
    pub fn completion<F>(mut self, completion: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.completion = Completion::new(completion);
        self
    }

    /// Resolves the backend kind for this builder's settings.
    ///
    /// # Errors
    ///
    /// * If `expected` is 0
    /// * If `expected` exceeds the chosen backend's maximum
    /// * If the centralized backend was requested together with a completion action
    pub fn backend_kind(&self) -> Result<BackendKind, Error> {
        if self.expected == 0 {
            return Err(Error::ZeroParticipants);
        }

        let kind = match self.config.strategy {
            BarrierStrategy::Auto => {
                if self.completion.is_noop() && self.expected <= centralized::MAX {
                    BackendKind::Centralized
                } else {
                    BackendKind::Tree
                }
            }
            BarrierStrategy::Centralized => {
                if !self.completion.is_noop() {
                    return Err(Error::CompletionRequiresTree);
                }
                BackendKind::Centralized
            }
            BarrierStrategy::Tree => BackendKind::Tree,
        };

        if self.expected > kind.max() {
            return Err(Error::TooManyParticipants {
                expected: self.expected,
                max: kind.max(),
            });
        }

        Ok(kind)
    }

    /// Builds a barrier that blocks through the wait strategy in the configuration.
    ///
    /// # Errors
    ///
    /// * If `expected` is 0
    /// * If `expected` exceeds the chosen backend's maximum
    /// * If the centralized backend was requested together with a completion action
    /// * If the ticket arena cannot be allocated
    pub fn build(self) -> Result<Barrier, Error> {
        let service = ConfiguredWait::from_config(&self.config);
        self.build_with_service(service)
    }

    /// Builds a barrier that blocks through `service`.
    ///
    /// # Errors
    ///
    /// * If `expected` is 0
    /// * If `expected` exceeds the chosen backend's maximum
    /// * If the centralized backend was requested together with a completion action
    /// * If the ticket arena cannot be allocated
    pub fn build_with_service<S: WaitService>(self, service: S) -> Result<Barrier<S>, Error> {
        let kind = self.backend_kind()?;

        let backend = match kind {
            BackendKind::Centralized => {
                Backend::Centralized(CentralizedBarrier::new(self.expected, service))
            }
            BackendKind::Tree => Backend::Tree(TreeBarrier::try_new(
                self.expected,
                self.completion,
                self.config.leaf_selection,
                service,
            )?),
        };

        log::debug!(
            "Created {kind} barrier: expected={} leaf_selection={:?} wait={:?}",
            self.expected,
            self.config.leaf_selection,
            self.config.wait,
        );

        Ok(Barrier { backend })
    }
}

impl fmt::Debug for BarrierBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierBuilder")
            .field("expected", &self.expected)
            .field("config", &self.config)
            .field("completion", &self.completion)
            .finish()
    }
}
