//! Environment variable access for configuration.
//!
//! [`StandardEnv`] reads the process environment. [`MapEnv`] holds its own set of variables so
//! configuration can be exercised without touching the process environment.

use std::{
    collections::BTreeMap,
    str::FromStr,
    sync::{PoisonError, RwLock},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Environment variable '{0}' not found")]
    NotFound(String),
    #[error("Invalid value '{value}' for environment variable '{name}': {message}")]
    Parse {
        name: String,
        value: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, EnvError>;

/// Source of environment variables.
pub trait EnvProvider: Send + Sync {
    /// Get an environment variable as a string
    ///
    /// # Errors
    ///
    /// * If the environment variable is not found
    fn var(&self, name: &str) -> Result<String>;

    /// Get an optional environment variable parsed as a specific type
    ///
    /// # Returns
    ///
    /// * `Ok(Some(value))` if the variable exists and parses successfully
    /// * `Ok(None)` if the variable doesn't exist
    /// * `Err(EnvError::Parse)` if the variable exists but can't be parsed
    ///
    /// # Errors
    ///
    /// * If the environment variable exists but cannot be parsed to the target type
    fn var_parse_opt<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
        Self: Sized,
    {
        let Ok(value) = self.var(name) else {
            return Ok(None);
        };

        value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EnvError::Parse {
                name: name.to_string(),
                value,
                message: e.to_string(),
            })
    }

    /// Get an environment variable parsed with a default value used when it is unset
    ///
    /// # Errors
    ///
    /// * If the environment variable exists but cannot be parsed to the target type
    fn var_parse_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
        Self: Sized,
    {
        Ok(self.var_parse_opt(name)?.unwrap_or(default))
    }
}

/// Standard environment provider that uses `std::env`
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardEnv;

impl StandardEnv {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EnvProvider for StandardEnv {
    fn var(&self, name: &str) -> Result<String> {
        std::env::var(name).map_err(|_| EnvError::NotFound(name.to_string()))
    }
}

/// In-memory environment provider, isolated from the process environment
#[derive(Debug, Default)]
pub struct MapEnv {
    vars: RwLock<BTreeMap<String, String>>,
}

impl MapEnv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_var(&self, name: &str, value: &str) {
        self.vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.to_string());
    }

    pub fn remove_var(&self, name: &str) {
        self.vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: RwLock::new(
                iter.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl EnvProvider for MapEnv {
    fn var(&self, name: &str) -> Result<String> {
        self.vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| EnvError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn map_env_returns_set_values() {
        let env = MapEnv::new();
        env.set_var("SPIN", "12");

        assert_eq!(env.var("SPIN").unwrap(), "12");
        assert_eq!(env.var_parse_or::<u32>("SPIN", 0).unwrap(), 12);
    }

    #[test_log::test]
    fn map_env_missing_falls_back_to_default() {
        let env = MapEnv::new();

        assert!(matches!(env.var("MISSING"), Err(EnvError::NotFound(name)) if name == "MISSING"));
        assert_eq!(env.var_parse_or::<u32>("MISSING", 7).unwrap(), 7);
    }

    #[test_log::test]
    fn map_env_unparsable_value_is_an_error() {
        let env: MapEnv = [("SPIN", "lots")].into_iter().collect();

        let err = env.var_parse_opt::<u32>("SPIN").unwrap_err();
        assert!(
            matches!(&err, EnvError::Parse { name, value, .. } if name == "SPIN" && value == "lots"),
            "unexpected error: {err:?}"
        );
    }

    #[test_log::test]
    fn map_env_remove_var_unsets() {
        let env: MapEnv = [("A", "1")].into_iter().collect();
        env.remove_var("A");

        assert_eq!(env.var_parse_opt::<u32>("A").unwrap(), None);
    }
}
