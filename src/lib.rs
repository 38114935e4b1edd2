//! Floodgate - Fail-Open Request Rate Limiting
//!
//! This crate implements a request-gating rate limiter: at most `max`
//! operations per time window, keyed by an arbitrary caller scope,
//! enforced through an external atomic counter store. When that store
//! is unreachable the gate fails open and lets traffic through rather
//! than blocking on a degraded dependency.

pub mod config;
pub mod decision;
pub mod error;
pub mod gate;
pub mod key;
pub mod store;

pub use config::{GatePolicy, TierBook};
pub use decision::{Outcome, RateLimitDecision};
pub use error::{Error, Result};
pub use gate::{RateLimiter, Ticket};
pub use key::{storage_key, CallerContext, DefaultKeySource, KeySource};
pub use store::{CountReply, CounterStore, MemoryStore, RedisStore, StoreError};
