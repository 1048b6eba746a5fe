//! Background Tasks Module
//!
//! Optional periodic sweeping. The caches evict lazily on `add`; a sweep task
//! additionally bounds how long stale entries linger between writes.

mod sweep;

pub use sweep::{spawn_sweep_task, Sweep};
