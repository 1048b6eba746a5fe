//! Configuration Module
//!
//! Loads cache settings from environment variables.

use std::env;
use std::hash::Hash;
use std::time::Duration;

use crate::cache::{TimedPromiseCache, TimedValueCache};
use crate::error::{CacheError, Result};

const VALUE_EXPIRY_VAR: &str = "CACHE_EXPIRY_MS";
const PROMISE_EXPIRY_VAR: &str = "PROMISE_CACHE_EXPIRY_MS";
const SWEEP_INTERVAL_VAR: &str = "CACHE_SWEEP_INTERVAL_MS";

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Expiry window of the value cache in milliseconds
    pub value_expiry_ms: u64,
    /// Expiry window of the promise cache in milliseconds, counted from resolution
    pub promise_expiry_ms: u64,
    /// Background sweep interval in milliseconds, 0 = lazy eviction only
    pub sweep_interval_ms: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_EXPIRY_MS` - Value cache window (default: 300000)
    /// - `PROMISE_CACHE_EXPIRY_MS` - Promise cache window (default: 30000)
    /// - `CACHE_SWEEP_INTERVAL_MS` - Background sweep interval (default: 0, disabled)
    ///
    /// Unset variables fall back to their default; set but malformed ones are
    /// an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    // == From Lookup ==
    /// Same as [`Config::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            value_expiry_ms: parse_ms(&lookup, VALUE_EXPIRY_VAR, defaults.value_expiry_ms)?,
            promise_expiry_ms: parse_ms(&lookup, PROMISE_EXPIRY_VAR, defaults.promise_expiry_ms)?,
            sweep_interval_ms: parse_ms(&lookup, SWEEP_INTERVAL_VAR, defaults.sweep_interval_ms)?,
        })
    }

    // == Sweep Interval ==
    /// Interval for the background sweep task, if enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    /// Builds a value cache with the configured window.
    pub fn value_cache<K, V>(&self) -> TimedValueCache<K, V>
    where
        K: Hash + Eq + Clone,
    {
        TimedValueCache::new(self.value_expiry_ms)
    }

    /// Builds a promise cache with the configured window.
    pub fn promise_cache<K, V, E>(&self) -> TimedPromiseCache<K, V, E>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        TimedPromiseCache::new(self.promise_expiry_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            value_expiry_ms: 300_000,
            promise_expiry_ms: 30_000,
            sweep_interval_ms: 0,
        }
    }
}

fn parse_ms<F>(lookup: &F, name: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| CacheError::InvalidConfig {
            name: name.to_string(),
            reason: format!("{raw:?} is not a millisecond count ({e})"),
        }),
    }
}
