//! Error types for the cache crate
//!
//! Cache operations themselves never fail; absence is `None`. Errors come
//! from loading configuration.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// An environment variable held a value that is not a valid setting
    #[error("Invalid config {name}: {reason}")]
    InvalidConfig { name: String, reason: String },
}

// == Result Type Alias ==
/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
