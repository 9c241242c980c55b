//! Explicit configuration for barrier and latch construction.
//!
//! Every knob has a default, and every knob can be loaded from an environment variable through
//! [`Config::from_env`]. Enum values are spelled in `SCREAMING_SNAKE_CASE`, e.g.
//! `SWITCHY_RENDEZVOUS_BARRIER_STRATEGY=TREE`.

use std::time::Duration;

use strum_macros::{AsRefStr, EnumString};

use crate::env::{self, EnvProvider, StandardEnv};

pub const BARRIER_STRATEGY_VAR: &str = "SWITCHY_RENDEZVOUS_BARRIER_STRATEGY";
pub const LEAF_SELECTION_VAR: &str = "SWITCHY_RENDEZVOUS_LEAF_SELECTION";
pub const WAIT_STRATEGY_VAR: &str = "SWITCHY_RENDEZVOUS_WAIT_STRATEGY";
pub const SPIN_LIMIT_VAR: &str = "SWITCHY_RENDEZVOUS_SPIN_LIMIT";
pub const YIELD_LIMIT_VAR: &str = "SWITCHY_RENDEZVOUS_YIELD_LIMIT";
pub const MAX_SLEEP_MICROS_VAR: &str = "SWITCHY_RENDEZVOUS_MAX_SLEEP_MICROS";

/// Which barrier backend to build.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BarrierStrategy {
    /// Packed word when there is no completion action and the count fits, tree otherwise.
    #[default]
    Auto,
    /// Single packed atomic word. Cannot host a completion action.
    Centralized,
    /// Combining tree of ticket slots.
    Tree,
}

/// How an arriving thread picks its starting leaf in the tree backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LeafSelection {
    /// Derived from the calling thread's cached [`crate::thread_id`], so a thread keeps landing on
    /// the same leaf across generations.
    #[default]
    ThreadAffinity,
    /// Handed out from a shared counter, one leaf per arrival.
    RoundRobin,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitStrategy {
    /// Park blocked threads in an address-keyed wait table.
    #[default]
    Park,
    /// Never park; poll with spin, yield, then sleep backoff.
    Backoff,
}

/// Tuning for [`crate::BackoffWait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub spin_limit: u32,
    pub yield_limit: u32,
    pub max_sleep: Duration,
}

impl BackoffConfig {
    pub const DEFAULT_SPIN_LIMIT: u32 = 64;
    pub const DEFAULT_YIELD_LIMIT: u32 = 16;
    pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_millis(1);

    #[must_use]
    pub const fn new() -> Self {
        Self {
            spin_limit: Self::DEFAULT_SPIN_LIMIT,
            yield_limit: Self::DEFAULT_YIELD_LIMIT,
            max_sleep: Self::DEFAULT_MAX_SLEEP,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub strategy: BarrierStrategy,
    pub leaf_selection: LeafSelection,
    pub wait: WaitStrategy,
    pub backoff: BackoffConfig,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// * If a variable is set but its value cannot be parsed
    pub fn from_env() -> Result<Self, env::EnvError> {
        Self::from_provider(&StandardEnv::new())
    }

    /// Loads configuration from the given environment provider.
    ///
    /// # Errors
    ///
    /// * If a variable is set but its value cannot be parsed
    pub fn from_provider(provider: &impl EnvProvider) -> Result<Self, env::EnvError> {
        let defaults = BackoffConfig::new();
        let max_sleep_micros = provider.var_parse_opt::<u64>(MAX_SLEEP_MICROS_VAR)?;

        let config = Self {
            strategy: provider.var_parse_or(BARRIER_STRATEGY_VAR, BarrierStrategy::default())?,
            leaf_selection: provider.var_parse_or(LEAF_SELECTION_VAR, LeafSelection::default())?,
            wait: provider.var_parse_or(WAIT_STRATEGY_VAR, WaitStrategy::default())?,
            backoff: BackoffConfig {
                spin_limit: provider.var_parse_or(SPIN_LIMIT_VAR, defaults.spin_limit)?,
                yield_limit: provider.var_parse_or(YIELD_LIMIT_VAR, defaults.yield_limit)?,
                max_sleep: max_sleep_micros.map_or(defaults.max_sleep, Duration::from_micros),
            },
        };

        log::debug!("Loaded rendezvous config: {config:?}");

        Ok(config)
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: BarrierStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_leaf_selection(mut self, leaf_selection: LeafSelection) -> Self {
        self.leaf_selection = leaf_selection;
        self
    }

    #[must_use]
    pub const fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}
