//! Counter store contract and its implementations.
//!
//! The rate limiter keeps no counters of its own. Usage counters and
//! per-identity overrides live in a store that offers atomic
//! increment-with-expiry on integer keys.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while talking to a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached, timed out, or answered with a protocol error.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be interpreted as a valid integer.
    #[error("Malformed value stored at {key}: {value:?}")]
    MalformedValue { key: String, value: String },
}

/// Result type alias for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Integer key-value store with native expiry.
///
/// Absent and expired keys read as `0` and never produce an error.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the value at `key` by one and return the new value.
    ///
    /// A key that is absent or expired starts again from zero. Every call
    /// (re)sets the expiry to `window_secs` from now. Concurrent callers on
    /// the same key never observe the same pre-increment value.
    async fn increment_with_expiry(&self, key: &str, window_secs: u64) -> StoreResult<i64>;

    /// Read the value at `key`, or `0` if it is absent or expired.
    async fn get(&self, key: &str) -> StoreResult<i64>;

    /// Seconds until `key` expires, or `0` if it is absent, expired or has no expiry.
    async fn get_ttl_seconds(&self, key: &str) -> StoreResult<i64>;

    /// Overwrite the value and expiry of `key`. A `window_secs` of `0` stores
    /// the value without an expiry.
    async fn set_with_expiry(&self, key: &str, value: i64, window_secs: u64) -> StoreResult<()>;
}
