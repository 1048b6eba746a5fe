//! Expiry Sweep Task
//!
//! Background task that periodically evicts expired cache entries.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{Clock, TimedPromiseCache, TimedValueCache};

// == Sweep Trait ==
/// A cache that can run its expiry sweep on demand.
pub trait Sweep: Send + Sync + 'static {
    /// Evicts expired entries, returning how many were removed.
    fn sweep(&self) -> impl Future<Output = usize> + Send;
}

impl<K, V, C> Sweep for RwLock<TimedValueCache<K, V, C>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: Clock,
{
    fn sweep(&self) -> impl Future<Output = usize> + Send {
        async move { self.write().await.purge_expired() }
    }
}

impl<K, V, E, C> Sweep for TimedPromiseCache<K, V, E, C>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: Clock,
{
    fn sweep(&self) -> impl Future<Output = usize> + Send {
        async move { self.purge_expired() }
    }
}

/// Spawns a background task that periodically sweeps `cache`.
///
/// # Arguments
/// * `cache` - Shared reference to the cache
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task; abort it on shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(RwLock::new(TimedValueCache::<String, String>::new(1_000)));
/// let sweeper = spawn_sweep_task(cache.clone(), Duration::from_millis(500));
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_sweep_task<S: Sweep>(cache: Arc<S>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting cache sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.sweep().await;

            if removed > 0 {
                info!("Cache sweep: removed {} expired entries", removed);
            } else {
                debug!("Cache sweep: no expired entries found");
            }
        }
    })
}
