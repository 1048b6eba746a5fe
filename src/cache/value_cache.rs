//! Timed Value Cache Module
//!
//! Key-value map whose entries expire a fixed window after their last touch.
//! Stale entries are purged lazily, as a side effect of `add`.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use crate::cache::{CacheStats, Clock, ExpiryQueue, SystemClock, ValueEntry};

// == Timed Value Cache ==
/// Cache where reads extend freshness.
///
/// Every `add` and successful `get` sets the entry's deadline to
/// `now + expiry_ms`. An entry whose deadline has passed is removed by the
/// next sweep, which runs at the start of every `add`.
#[derive(Debug)]
pub struct TimedValueCache<K, V, C = SystemClock> {
    /// Key-value storage
    entries: HashMap<K, ValueEntry<V>>,
    /// Keys ordered by deadline
    queue: ExpiryQueue<K>,
    /// Expiry window in milliseconds
    expiry_ms: u64,
    /// Next expiry slot id
    next_id: u64,
    stats: CacheStats,
    clock: C,
}

impl<K, V> TimedValueCache<K, V, SystemClock>
where
    K: Hash + Eq + Clone,
{
    // == Constructor ==
    /// Creates a cache backed by the system clock.
    ///
    /// # Arguments
    /// * `expiry_ms` - How long an entry stays fresh after its last touch
    pub fn new(expiry_ms: u64) -> Self {
        Self::with_clock(expiry_ms, SystemClock)
    }
}

impl<K, V, C> TimedValueCache<K, V, C>
where
    K: Hash + Eq + Clone,
    C: Clock,
{
    // == Constructor With Clock ==
    /// Creates a cache reading time from `clock`.
    pub fn with_clock(expiry_ms: u64, clock: C) -> Self {
        Self {
            entries: HashMap::new(),
            queue: ExpiryQueue::new(),
            expiry_ms,
            next_id: 0,
            stats: CacheStats::new(),
            clock,
        }
    }

    // == Add ==
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// The old entry's queue slot is dropped first so it cannot evict the new
    /// value. Then stale entries are swept and the new entry is scheduled
    /// `expiry_ms` from now.
    pub fn add(&mut self, key: K, value: V) {
        if let Some(previous) = self.entries.remove(&key) {
            self.queue.cancel(previous.slot);
        }

        let now = self.clock.now_ms();
        self.sweep(now);

        let id = self.allocate_id();
        let entry = ValueEntry::new(value, now, self.expiry_ms, id);
        self.queue.schedule(entry.slot, key.clone());
        self.entries.insert(key, entry);
    }

    // == Get ==
    /// Returns the value stored under `key`, refreshing its freshness.
    ///
    /// Does not sweep: an entry past its window that no `add` has swept yet is
    /// still returned, and the read makes it fresh again.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now_ms();
        let id = self.next_id;

        let Some(entry) = self.entries.get_mut(key) else {
            self.stats.record_miss();
            return None;
        };
        self.next_id += 1;

        let previous = entry.touch(now, self.expiry_ms, id);
        if let Some(owned_key) = self.queue.cancel(previous) {
            self.queue.schedule(entry.slot, owned_key);
        }

        self.stats.record_hit();
        Some(&entry.value)
    }

    // == Remove ==
    /// Removes `key`, returning its value if it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.remove(key)?;
        self.queue.cancel(entry.slot);
        Some(entry.value)
    }

    // == Purge Expired ==
    /// Runs the expiry sweep now. Returns the number of entries evicted.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.sweep(now)
    }

    // == Contains Key ==
    /// True if `key` is stored, whether or not its window has passed.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    // == Last Touched ==
    /// Returns when `key` was last added or read (Unix milliseconds).
    ///
    /// Does not count as a read.
    pub fn last_touched<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|entry| entry.touched_at)
    }

    // == Remaining ==
    /// Returns milliseconds left in `key`'s window, 0 if it has passed.
    ///
    /// Does not count as a read.
    pub fn remaining_ms<Q>(&self, key: &Q) -> Option<u64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now_ms();
        self.entries.get(key).map(|entry| entry.remaining_ms(now))
    }

    // == Length ==
    /// Returns the current number of entries, including unswept stale ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Clear ==
    /// Drops every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.queue.clear();
    }

    // == Expiry Window ==
    /// Returns the window, in milliseconds, an entry stays fresh after a touch.
    pub fn expiry_ms(&self) -> u64 {
        self.expiry_ms
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Sweep ==
    /// Evicts every entry whose deadline is before `now`.
    fn sweep(&mut self, now: u64) -> usize {
        let expired = self.queue.drain_expired(now);
        let count = expired.len();

        for (_, key) in expired {
            self.entries.remove(&key);
        }

        if count > 0 {
            self.stats.record_evictions(count);
            debug!(evicted = count, remaining = self.entries.len(), "value cache sweep");
        }
        count
    }

    // == Allocate Id ==
    /// Hands out the next expiry slot id.
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }
}
