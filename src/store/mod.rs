//! Counter store abstraction.
//!
//! The gate delegates all mutual exclusion to the store: the atomic
//! [`check_and_count`](CounterStore::check_and_count) operation is the
//! only thing standing between concurrent callers and an over-admitted
//! window.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by counter store implementations.
///
/// The gate treats every variant the same way on the request path:
/// log and fail open.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the operation timeout.
    #[error("counter store operation timed out")]
    Timeout,

    /// The store answered with something the protocol does not allow.
    #[error("counter store returned a malformed reply: {0}")]
    MalformedReply(String),
}

/// Result of the atomic check-and-count operation.
#[derive(Debug, Clone, Copy)]
pub struct CountReply {
    /// Whether the request fits within the window budget.
    pub allowed: bool,
    /// Counter value after the operation.
    pub count: u64,
    /// Time until the window expires and the counter restarts.
    pub reset_after: Duration,
}

/// An external store with atomic increment-and-expire semantics.
///
/// Implementations must serialize concurrent
/// [`check_and_count`](Self::check_and_count) calls for the same key:
/// two simultaneous requests must never both observe "first request in
/// a fresh window", and the number of allowed calls within one window
/// never exceeds `max`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically get-or-create the counter for `key` and count one
    /// request against it.
    ///
    /// If no live entry exists, one is created with count 1 and a TTL of
    /// `window`. If the entry is already at or above `max`, the counter
    /// is left untouched and the reply is a denial.
    async fn check_and_count(
        &self,
        key: &str,
        max: u32,
        window: Duration,
    ) -> std::result::Result<CountReply, StoreError>;

    /// Roll back one count for `key`, leaving the TTL untouched.
    ///
    /// Decrementing a missing or zeroed entry is a no-op; counters never
    /// go negative.
    async fn uncount(&self, key: &str) -> std::result::Result<(), StoreError>;

    /// Current counter value, if a live entry exists.
    async fn current(&self, key: &str) -> std::result::Result<Option<u64>, StoreError>;

    /// Time until the entry for `key` expires, if a live entry exists.
    async fn time_to_reset(&self, key: &str)
        -> std::result::Result<Option<Duration>, StoreError>;

    /// Administrative removal of a single entry.
    async fn remove(&self, key: &str) -> std::result::Result<(), StoreError>;

    /// Administrative flush of every rate limit entry.
    async fn clear(&self) -> std::result::Result<(), StoreError>;
}
