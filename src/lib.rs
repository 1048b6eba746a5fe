//! Expiring Cache - in-process caches with time-boxed entries
//!
//! Provides a value cache whose reads extend freshness and a promise cache
//! that deduplicates in-flight fetches and keeps their results for a grace
//! window after they resolve. Both evict lazily when new entries are added.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{
    CacheStats, Clock, ManualClock, SharedFetch, SystemClock, TimedPromiseCache, TimedValueCache,
};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::{spawn_sweep_task, Sweep};
