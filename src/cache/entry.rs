//! Cache Entry Module
//!
//! Entry type for the value cache.

use crate::cache::ExpirySlot;

// == Value Entry ==
/// A stored value together with its freshness metadata.
#[derive(Debug, Clone)]
pub struct ValueEntry<V> {
    /// The stored value
    pub value: V,
    /// Last insertion or read (Unix milliseconds)
    pub touched_at: u64,
    /// Where this entry currently sits in the expiry queue
    pub slot: ExpirySlot,
}

impl<V> ValueEntry<V> {
    // == Constructor ==
    /// Creates an entry touched at `now`, expiring `expiry_ms` later.
    pub fn new(value: V, now: u64, expiry_ms: u64, id: u64) -> Self {
        Self {
            value,
            touched_at: now,
            slot: ExpirySlot::new(now.saturating_add(expiry_ms), id),
        }
    }

    // == Touch ==
    /// Refreshes the entry and returns its previous slot.
    pub fn touch(&mut self, now: u64, expiry_ms: u64, id: u64) -> ExpirySlot {
        let previous = self.slot;
        self.touched_at = now;
        self.slot = ExpirySlot::new(now.saturating_add(expiry_ms), id);
        previous
    }

    // == Remaining ==
    /// Milliseconds left before the entry becomes stale, 0 if already stale.
    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.slot.deadline.saturating_sub(now)
    }
}
