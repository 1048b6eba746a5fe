//! Timed Promise Cache Module
//!
//! Deduplicates concurrent fetches of the same resource. Every caller asking
//! for a key while its fetch is in flight gets a clone of the same shared
//! future. Once the fetch resolves the result stays cached for the expiry
//! window, after which the next `add` sweeps it out.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{CacheStats, Clock, ExpiryQueue, ExpirySlot, SystemClock};

/// Cloneable handle to a cached fetch. Awaiting any clone yields the same
/// outcome.
pub type SharedFetch<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

// == Promise Slot ==
struct PromiseSlot<V, E> {
    fetch: SharedFetch<V, E>,
    /// Generation of this entry; continuations of older generations are ignored
    id: u64,
    /// Set once the fetch resolves successfully
    expires_at: Option<u64>,
}

// == Promise State ==
struct PromiseState<K, V, E> {
    entries: HashMap<K, PromiseSlot<V, E>>,
    /// Only resolved entries are queued
    queue: ExpiryQueue<K>,
    next_id: u64,
    stats: CacheStats,
}

impl<K, V, E> PromiseState<K, V, E>
where
    K: Hash + Eq + Clone,
{
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            queue: ExpiryQueue::new(),
            next_id: 0,
            stats: CacheStats::new(),
        }
    }

    // == Sweep ==
    /// Evicts resolved entries whose window ended before `now`.
    fn sweep(&mut self, now: u64) -> usize {
        let mut evicted = 0;
        for (slot, key) in self.queue.drain_expired(now) {
            if self.entries.get(&key).is_some_and(|entry| entry.id == slot.id) {
                self.entries.remove(&key);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.record_evictions(evicted);
            debug!(evicted, remaining = self.entries.len(), "promise cache sweep");
        }
        evicted
    }

    // == Insert ==
    /// Stores `slot`, unscheduling whatever generation it replaces.
    fn insert(&mut self, key: K, slot: PromiseSlot<V, E>) {
        if let Some(previous) = self.entries.insert(key, slot) {
            if let Some(deadline) = previous.expires_at {
                self.queue.cancel(ExpirySlot::new(deadline, previous.id));
            }
        }
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<PromiseSlot<V, E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.entries.remove(key)?;
        if let Some(deadline) = slot.expires_at {
            self.queue.cancel(ExpirySlot::new(deadline, slot.id));
        }
        Some(slot)
    }

    // == Resolve ==
    /// Starts the expiry window of generation `id` of `key`.
    fn resolve(&mut self, key: &K, id: u64, deadline: u64) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.id != id || entry.expires_at.is_some() {
            return;
        }
        entry.expires_at = Some(deadline);
        self.queue.schedule(ExpirySlot::new(deadline, id), key.clone());
    }

    // == Reject ==
    /// Drops generation `id` of `key` so the next caller fetches again.
    fn reject(&mut self, key: &K, id: u64) {
        if self.entries.get(key).is_some_and(|entry| entry.id == id) {
            self.entries.remove(key);
            self.stats.record_rejection();
            debug!("promise cache dropped a failed fetch");
        }
    }
}

// == Timed Promise Cache ==
/// Cache of in-flight and recently resolved fetches.
///
/// The handle is cheap to clone; clones share the same entries.
///
/// When `add` is called from inside a Tokio runtime the fetch is spawned so
/// it makes progress (and starts its expiry window) even if nobody awaits it.
/// Outside a runtime it runs when first awaited.
pub struct TimedPromiseCache<K, V, E, C = SystemClock> {
    state: Arc<Mutex<PromiseState<K, V, E>>>,
    expiry_ms: u64,
    clock: C,
}

impl<K, V, E, C: Clone> Clone for TimedPromiseCache<K, V, E, C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            expiry_ms: self.expiry_ms,
            clock: self.clock.clone(),
        }
    }
}

impl<K, V, E> TimedPromiseCache<K, V, E, SystemClock>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache backed by the system clock.
    ///
    /// # Arguments
    /// * `expiry_ms` - How long a resolved fetch stays cached
    pub fn new(expiry_ms: u64) -> Self {
        Self::with_clock(expiry_ms, SystemClock)
    }
}

impl<K, V, E, C> TimedPromiseCache<K, V, E, C>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    C: Clock,
{
    // == Constructor With Clock ==
    /// Creates a cache reading time from `clock`.
    pub fn with_clock(expiry_ms: u64, clock: C) -> Self {
        Self {
            state: Arc::new(Mutex::new(PromiseState::new())),
            expiry_ms,
            clock,
        }
    }

    // == Add ==
    /// Caches `fetch` under `key` and returns its shared handle.
    ///
    /// `None` is passed straight through without touching the cache, so an
    /// optional fetch can be handed over unchecked. Otherwise the expired
    /// entries are swept and the new fetch replaces whatever `key` held.
    pub fn add<F>(&self, key: K, fetch: Option<F>) -> Option<SharedFetch<V, E>>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let fetch = fetch?;

        let shared = {
            let mut state = self.state.lock();
            state.sweep(self.clock.now_ms());

            let id = state.next_id;
            state.next_id += 1;

            let shared = self.track(key.clone(), id, fetch).boxed().shared();
            state.insert(
                key,
                PromiseSlot {
                    fetch: shared.clone(),
                    id,
                    expires_at: None,
                },
            );
            shared
        };

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(shared.clone());
        }

        Some(shared)
    }

    // == Get ==
    /// Returns the handle cached under `key`, pending or resolved.
    ///
    /// Never sweeps and never extends the expiry window.
    pub fn get<Q>(&self, key: &Q) -> Option<SharedFetch<V, E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.state.lock();
        let fetch = state.entries.get(key).map(|entry| entry.fetch.clone());
        match fetch {
            Some(_) => state.stats.record_hit(),
            None => state.stats.record_miss(),
        }
        fetch
    }

    // == Remove ==
    /// Forgets `key`. Callers already holding its handle keep it.
    pub fn remove<Q>(&self, key: &Q) -> Option<SharedFetch<V, E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.lock().remove(key).map(|slot| slot.fetch)
    }

    // == Purge Expired ==
    /// Runs the expiry sweep now. Returns the number of entries evicted.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.state.lock().sweep(now)
    }

    // == Contains Key ==
    /// True if `key` holds a fetch, pending or resolved.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state.lock().entries.contains_key(key)
    }

    // == Is Resolved ==
    /// True if `key` holds a fetch that has resolved successfully.
    pub fn is_resolved<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some())
    }

    // == Length ==
    /// Returns the number of cached fetches.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    // == Is Empty ==
    /// Returns true if no fetch is cached.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    // == Clear ==
    /// Drops every entry. In-flight fetches keep running for existing holders.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.queue.clear();
    }

    // == Expiry Window ==
    /// Returns the window, in milliseconds, a resolved fetch stays cached.
    pub fn expiry_ms(&self) -> u64 {
        self.expiry_ms
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        stats
    }

    // == Track ==
    /// Wraps `fetch` so its outcome updates the cache before being passed on
    /// unchanged.
    ///
    /// A panicking fetch counts as a failure: its entry is dropped before the
    /// panic is resumed, so later callers fetch again instead of receiving a
    /// poisoned handle.
    fn track<F>(&self, key: K, id: u64, fetch: F) -> impl Future<Output = Result<V, E>> + Send + 'static
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let state: Weak<Mutex<PromiseState<K, V, E>>> = Arc::downgrade(&self.state);
        let clock = self.clock.clone();
        let expiry_ms = self.expiry_ms;

        async move {
            let outcome = AssertUnwindSafe(fetch).catch_unwind().await;
            if let Some(cache) = state.upgrade() {
                let mut state = cache.lock();
                match &outcome {
                    Ok(Ok(_)) => state.resolve(&key, id, clock.now_ms().saturating_add(expiry_ms)),
                    Ok(Err(_)) | Err(_) => state.reject(&key, id),
                }
            }
            match outcome {
                Ok(outcome) => outcome,
                Err(payload) => panic::resume_unwind(payload),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use futures::future::{pending, ready};
    use tokio::sync::oneshot;

    type TestCache = TimedPromiseCache<String, String, String, ManualClock>;

    fn cache_at(start: u64, expiry_ms: u64) -> (TestCache, ManualClock) {
        let clock = ManualClock::new(start);
        (TimedPromiseCache::with_clock(expiry_ms, clock.clone()), clock)
    }

    fn controlled() -> (
        oneshot::Sender<Result<String, String>>,
        impl Future<Output = Result<String, String>> + Send + 'static,
    ) {
        let (tx, rx) = oneshot::channel();
        let fetch = async move { rx.await.unwrap_or_else(|_| Err("sender dropped".to_string())) };
        (tx, fetch)
    }

    #[tokio::test]
    async fn test_add_then_get_returns_same_handle() {
        let (cache, _) = cache_at(0, 10);

        let added = cache
            .add("xxx".to_string(), Some(ready(Ok("hello".to_string()))))
            .unwrap();
        let fetched = cache.get("xxx").unwrap();

        assert!(added.ptr_eq(&fetched));
        assert_eq!(fetched.await, Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn test_add_none_is_noop() {
        let (cache, _) = cache_at(0, 10);
        let first = cache
            .add("k".to_string(), Some(ready(Ok("v".to_string()))))
            .unwrap();

        let none: Option<futures::future::Ready<Result<String, String>>> = None;
        assert!(cache.add("k".to_string(), none).is_none());
        assert!(cache.get("k").unwrap().ptr_eq(&first));

        let none: Option<futures::future::Ready<Result<String, String>>> = None;
        assert!(cache.add("absent".to_string(), none).is_none());
        assert!(cache.get("absent").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_fetch_is_shared() {
        let (cache, _) = cache_at(0, 10);
        let (tx, fetch) = controlled();

        let first = cache.add("k".to_string(), Some(fetch)).unwrap();
        let second = cache.get("k").unwrap();
        assert!(first.ptr_eq(&second));
        assert!(!cache.is_resolved("k"));

        tx.send(Ok("done".to_string())).unwrap();
        assert_eq!(first.await, Ok("done".to_string()));
        assert_eq!(second.await, Ok("done".to_string()));
        assert!(cache.is_resolved("k"));
    }

    #[tokio::test]
    async fn test_pending_entry_never_expires() {
        let (cache, clock) = cache_at(0, 10);

        cache.add("slow".to_string(), Some(pending::<Result<String, String>>()));
        clock.advance(1_000_000);
        cache.add("other".to_string(), Some(ready(Ok("x".to_string()))));

        assert!(cache.contains_key("slow"));
    }

    #[tokio::test]
    async fn test_window_starts_at_resolution() {
        let (cache, clock) = cache_at(0, 10);
        let (tx, fetch) = controlled();

        let handle = cache.add("xxx".to_string(), Some(fetch)).unwrap();
        clock.set(20);
        tx.send(Ok("hello".to_string())).unwrap();
        assert_eq!(handle.await, Ok("hello".to_string()));

        // Resolved at 20, window ends at 30.
        cache.add("yyy".to_string(), Some(pending::<Result<String, String>>()));
        assert!(cache.get("xxx").is_some());

        clock.set(40);
        cache.add("yyy".to_string(), Some(pending::<Result<String, String>>()));
        assert!(cache.get("xxx").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_get_does_not_sweep() {
        let (cache, clock) = cache_at(0, 10);

        let handle = cache
            .add("k".to_string(), Some(ready(Ok("v".to_string()))))
            .unwrap();
        handle.await.unwrap();
        clock.advance(100);

        assert!(cache.get("k").is_some());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let (cache, clock) = cache_at(0, 10);
        let (slow_tx, slow) = controlled();
        let (fast_tx, fast) = controlled();

        let a = cache.add("a".to_string(), Some(slow)).unwrap();
        let b = cache.add("b".to_string(), Some(fast)).unwrap();

        fast_tx.send(Ok("b".to_string())).unwrap();
        b.await.unwrap();
        clock.set(5);
        slow_tx.send(Ok("a".to_string())).unwrap();
        a.await.unwrap();

        // b expires at 10, a at 15.
        clock.set(12);
        cache.add("c".to_string(), Some(pending::<Result<String, String>>()));

        assert!(!cache.contains_key("b"));
        assert!(cache.contains_key("a"));
    }

    #[tokio::test]
    async fn test_rejected_fetch_is_dropped() {
        let (cache, _) = cache_at(0, 10);

        let handle = cache
            .add("k".to_string(), Some(ready(Err::<String, _>("boom".to_string()))))
            .unwrap();

        assert_eq!(handle.await, Err("boom".to_string()));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.queued_len(), 0);
        assert_eq!(cache.stats().rejections, 1);
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_dropped() {
        let (cache, _) = cache_at(0, 10);
        let explode = true;

        let handle = cache
            .add(
                "k".to_string(),
                Some(async move {
                    if explode {
                        panic!("fetch blew up");
                    }
                    Ok::<String, String>("unreachable".to_string())
                }),
            )
            .unwrap();

        let joined = tokio::spawn(handle).await;
        assert!(joined.unwrap_err().is_panic());

        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().rejections, 1);

        cache.add("other".to_string(), Some(pending::<Result<String, String>>()));
        assert!(!cache.contains_key("k"));

        let retry = cache
            .add("k".to_string(), Some(ready(Ok("recovered".to_string()))))
            .unwrap();
        assert_eq!(retry.await, Ok("recovered".to_string()));
        assert!(cache.is_resolved("k"));
    }

    #[tokio::test]
    async fn test_superseded_fetch_does_not_touch_new_entry() {
        let (cache, clock) = cache_at(0, 10);
        let (old_tx, old) = controlled();
        let (_new_tx, new) = controlled();

        let old_handle = cache.add("k".to_string(), Some(old)).unwrap();
        let new_handle = cache.add("k".to_string(), Some(new)).unwrap();

        old_tx.send(Err("stale failure".to_string())).unwrap();
        assert!(old_handle.await.is_err());

        assert!(cache.get("k").unwrap().ptr_eq(&new_handle));
        assert!(!cache.is_resolved("k"));

        clock.advance(1_000);
        assert_eq!(cache.purge_expired(), 0);
        assert!(cache.contains_key("k"));
        assert_eq!(cache.stats().rejections, 0);
    }

    #[tokio::test]
    async fn test_readd_after_resolution_cancels_old_window() {
        let (cache, clock) = cache_at(0, 10);

        let first = cache
            .add("k".to_string(), Some(ready(Ok("v1".to_string()))))
            .unwrap();
        first.await.unwrap();
        assert_eq!(cache.queued_len(), 1);

        let (_tx, fetch) = controlled();
        cache.add("k".to_string(), Some(fetch));
        assert_eq!(cache.queued_len(), 0);

        clock.advance(50);
        assert_eq!(cache.purge_expired(), 0);
        assert!(cache.contains_key("k"));
    }

    #[tokio::test]
    async fn test_spawned_fetch_resolves_without_awaiting() {
        let (cache, _) = cache_at(0, 10);

        cache.add("k".to_string(), Some(ready(Ok("v".to_string()))));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        assert!(cache.is_resolved("k"));
    }

    #[test]
    fn test_add_outside_runtime_is_lazy() {
        let (cache, _) = cache_at(0, 10);

        let handle = cache
            .add("k".to_string(), Some(ready(Ok("v".to_string()))))
            .unwrap();
        assert!(!cache.is_resolved("k"));

        assert_eq!(tokio_test::block_on(handle), Ok("v".to_string()));
        assert!(cache.is_resolved("k"));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let (cache, _) = cache_at(0, 10);
        let other = cache.clone();

        cache.add("k".to_string(), Some(ready(Ok("v".to_string()))));
        assert!(other.contains_key("k"));

        other.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_remove_keeps_outstanding_handle() {
        let (cache, _) = cache_at(0, 10);
        let (tx, fetch) = controlled();

        let handle = cache.add("k".to_string(), Some(fetch)).unwrap();
        assert!(cache.remove("k").is_some());
        assert!(cache.get("k").is_none());

        tx.send(Ok("late".to_string())).unwrap();
        assert_eq!(handle.await, Ok("late".to_string()));
        assert!(cache.is_empty());
    }
}
