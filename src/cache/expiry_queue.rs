//! Expiry Queue Module
//!
//! Deadline-ordered index used by both caches for lazy eviction.

use std::collections::BTreeMap;

// == Expiry Slot ==
/// Position of a key in the queue.
///
/// Ordered by deadline first, then by id, so keys sharing a deadline drain in
/// the order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpirySlot {
    /// Timestamp (Unix ms) after which the key is stale
    pub deadline: u64,
    /// Unique, monotonically increasing id assigned by the owning cache
    pub id: u64,
}

impl ExpirySlot {
    // == Constructor ==
    /// Creates a slot for `deadline`, disambiguated by `id`.
    pub fn new(deadline: u64, id: u64) -> Self {
        Self { deadline, id }
    }

    // == Is Expired ==
    /// A slot is expired once `now` has moved strictly past its deadline.
    pub fn is_expired(&self, now: u64) -> bool {
        self.deadline < now
    }
}

// == Expiry Queue ==
/// Keys ordered by deadline.
///
/// Unlike an append-only queue, the order here always matches the deadlines,
/// so refreshed entries and out-of-order resolutions drain correctly.
#[derive(Debug)]
pub struct ExpiryQueue<K> {
    slots: BTreeMap<ExpirySlot, K>,
}

impl<K> Default for ExpiryQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ExpiryQueue<K> {
    // == Constructor ==
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    // == Schedule ==
    /// Places `key` at `slot`.
    pub fn schedule(&mut self, slot: ExpirySlot, key: K) {
        self.slots.insert(slot, key);
    }

    // == Cancel ==
    /// Removes the key held at `slot`, returning it.
    pub fn cancel(&mut self, slot: ExpirySlot) -> Option<K> {
        self.slots.remove(&slot)
    }

    // == Drain Expired ==
    /// Removes and returns every key whose deadline is before `now`.
    ///
    /// Stops at the first live slot.
    pub fn drain_expired(&mut self, now: u64) -> Vec<(ExpirySlot, K)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.slots.first_entry() {
            if !entry.key().is_expired(now) {
                break;
            }
            let slot = *entry.key();
            expired.push((slot, entry.remove()));
        }
        expired
    }

    // == Length ==
    /// Returns the number of scheduled keys.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    // == Is Empty ==
    /// Returns true if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // == Clear ==
    /// Unschedules every key.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
