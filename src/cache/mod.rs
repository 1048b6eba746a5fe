//! Cache Module
//!
//! Expiring caches for values and for in-flight fetches.

mod clock;
mod entry;
mod expiry_queue;
mod promise_cache;
mod stats;
mod value_cache;


// Re-export public types
pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use entry::ValueEntry;
pub use expiry_queue::{ExpiryQueue, ExpirySlot};
pub use promise_cache::{SharedFetch, TimedPromiseCache};
pub use stats::CacheStats;
pub use value_cache::TimedValueCache;
