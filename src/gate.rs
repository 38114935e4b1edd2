//! Core rate limiter implementation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, trace};

use crate::config::GatePolicy;
use crate::decision::{Outcome, RateLimitDecision};
use crate::error::{Error, Result};
use crate::key::{storage_key, CallerContext, DefaultKeySource, KeySource};
use crate::store::{CountReply, CounterStore, StoreError};

/// The request gate: enforces "at most `max` operations per window" per
/// caller key against a [`CounterStore`], failing open when the store is
/// degraded.
///
/// The gate itself holds no counters and no locks; all mutual exclusion
/// is delegated to the store's atomic check-and-count operation, so the
/// struct can be shared freely across tasks.
pub struct RateLimiter {
    policy: GatePolicy,
    store: Arc<dyn CounterStore>,
    keys: Arc<dyn KeySource>,
}

/// Receipt for an admitted request.
///
/// Records what was consumed so [`RateLimiter::settle`] can hand the
/// slot back once the guarded operation's outcome is known.
#[derive(Debug)]
pub struct Ticket {
    storage_key: String,
    counted: bool,
    decision: RateLimitDecision,
}

impl Ticket {
    /// The decision that admitted this request.
    pub fn decision(&self) -> &RateLimitDecision {
        &self.decision
    }
}

impl RateLimiter {
    /// Create a gate over `store` with the given policy.
    ///
    /// The policy is validated here; a zero window never reaches the
    /// request path.
    pub fn new(policy: GatePolicy, store: Arc<dyn CounterStore>) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            store,
            keys: Arc::new(DefaultKeySource),
        })
    }

    /// Replace the default key derivation.
    pub fn with_key_source(mut self, keys: Arc<dyn KeySource>) -> Self {
        self.keys = keys;
        self
    }

    /// The policy this gate enforces.
    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Check the limit for `key` and optimistically consume one slot.
    ///
    /// The check-and-increment is a single store-side operation, so
    /// concurrent callers can never over-admit a window. On any store
    /// failure the failure is logged with the affected key and the
    /// request is allowed through.
    pub async fn check_and_consume(&self, key: &str) -> RateLimitDecision {
        let (decision, _) = self.consume(&storage_key(key)).await;
        decision
    }

    /// Derive the caller key, consume a slot, and return a [`Ticket`]
    /// for settlement, or [`Error::LimitExceeded`] when the budget is
    /// exhausted.
    pub async fn admit(&self, ctx: &CallerContext) -> Result<Ticket> {
        let key = self.keys.key(ctx);
        let storage_key = storage_key(&key);

        let (decision, counted) = self.consume(&storage_key).await;
        if !decision.allowed {
            return Err(Error::LimitExceeded {
                message: self.policy.message.clone(),
                retry_after_secs: decision.retry_after.unwrap_or(1),
            });
        }

        Ok(Ticket {
            storage_key,
            counted,
            decision,
        })
    }

    /// Complete the two-phase contract once the guarded operation's
    /// outcome is known.
    ///
    /// With `skip_successful_requests`, a success hands its slot back;
    /// with `skip_failed_requests`, a failure does. Tickets that never
    /// consumed (the store was degraded at admission) settle as no-ops.
    pub async fn settle(&self, ticket: Ticket, outcome: Outcome) {
        if !ticket.counted {
            return;
        }

        let roll_back = match outcome {
            Outcome::Success => self.policy.skip_successful_requests,
            Outcome::Failure => self.policy.skip_failed_requests,
        };
        if !roll_back {
            return;
        }

        if let Err(cause) = self.store.uncount(&ticket.storage_key).await {
            error!(
                key = %ticket.storage_key,
                error = %cause,
                "Failed to roll back rate limit count"
            );
        }
    }

    /// Administrative reset of a single caller key.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.store.remove(&storage_key(key)).await?;
        Ok(())
    }

    /// Administrative flush of every counter, primarily for test
    /// isolation.
    pub async fn flush_all(&self) -> Result<()> {
        self.store.clear().await?;
        Ok(())
    }

    /// Run the atomic store operation and turn its reply into a
    /// decision. The boolean reports whether a count was consumed.
    async fn consume(&self, storage_key: &str) -> (RateLimitDecision, bool) {
        trace!(key = %storage_key, "Checking rate limit");

        match self
            .store
            .check_and_count(storage_key, self.policy.max, self.policy.window())
            .await
        {
            Ok(reply) => {
                let decision = self.decision_from(reply, storage_key);
                let counted = decision.allowed;
                (decision, counted)
            }
            Err(cause) => (self.fail_open(storage_key, &cause), false),
        }
    }

    fn decision_from(&self, reply: CountReply, storage_key: &str) -> RateLimitDecision {
        let reset_at =
            Utc::now() + chrono::Duration::milliseconds(reply.reset_after.as_millis() as i64);

        if reply.allowed {
            let remaining = u64::from(self.policy.max).saturating_sub(reply.count) as u32;
            RateLimitDecision {
                allowed: true,
                limit: self.policy.max,
                remaining,
                reset_at,
                retry_after: None,
            }
        } else {
            debug!(
                key = %storage_key,
                count = reply.count,
                limit = self.policy.max,
                "Rate limit exceeded"
            );
            RateLimitDecision {
                allowed: false,
                limit: self.policy.max,
                remaining: 0,
                reset_at,
                retry_after: Some(reply.reset_after.as_secs().max(1)),
            }
        }
    }

    /// Availability beats strict enforcement while the store is down:
    /// log the fault and wave the request through.
    fn fail_open(&self, storage_key: &str, cause: &StoreError) -> RateLimitDecision {
        error!(
            key = %storage_key,
            error = %cause,
            "Counter store failure, allowing request"
        );

        RateLimitDecision {
            allowed: true,
            limit: self.policy.max,
            remaining: self.policy.max.saturating_sub(1),
            reset_at: Utc::now()
                + chrono::Duration::milliseconds(self.policy.window_ms as i64),
            retry_after: None,
        }
    }
}
