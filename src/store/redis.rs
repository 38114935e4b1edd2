//! Redis-backed counter store.
//!
//! The check-and-increment runs as a single server-side Lua script, so
//! concurrent callers are serialized by Redis itself and no client-side
//! locking is involved. Entry expiry is delegated entirely to Redis
//! TTLs. Counter state is best-effort: nothing beyond Redis's own
//! durability is assumed, and a flushed store simply opens fresh
//! windows.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::time::timeout;

use super::{CountReply, CounterStore, StoreError};
use crate::key::STORAGE_PREFIX;

/// Default bound on every store round trip.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Batch size for administrative SCANs.
const SCAN_COUNT: usize = 100;

/// Atomic get-or-create-and-increment-with-expiry.
///
/// KEYS[1] = counter key, ARGV[1] = max, ARGV[2] = window in ms.
/// Returns {allowed, count, pttl_ms}.
const CHECK_AND_COUNT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local max = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
if current >= max then
    local ttl = redis.call('PTTL', KEYS[1])
    if ttl < 0 then
        ttl = window
    end
    return {0, current, ttl}
end
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], window)
    ttl = window
end
return {1, count, ttl}
"#;

/// Conditional decrement that leaves the TTL untouched. Counters never
/// go below zero.
const UNCOUNT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
    redis.call('DECR', KEYS[1])
end
return 0
"#;

/// Counter store over a shared Redis instance.
///
/// Suitable for multi-instance deployments: every instance gating the
/// same key namespace sees the same counters.
pub struct RedisStore {
    conn: ConnectionManager,
    check_and_count: Script,
    uncount: Script,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::with_connection(conn))
    }

    /// Build a store over an existing managed connection.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            check_and_count: Script::new(CHECK_AND_COUNT),
            uncount: Script::new(UNCOUNT),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Override the per-operation timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Run a store round trip under the operation timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn check_and_count(
        &self,
        key: &str,
        max: u32,
        window: Duration,
    ) -> Result<CountReply, StoreError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as u64;

        let mut script = self.check_and_count.prepare_invoke();
        script.key(key).arg(max).arg(window_ms);

        let (allowed, count, pttl_ms): (i64, u64, i64) =
            self.bounded(script.invoke_async(&mut conn)).await?;

        let allowed = match allowed {
            0 => false,
            1 => true,
            other => {
                return Err(StoreError::MalformedReply(format!(
                    "allowed flag out of range: {}",
                    other
                )))
            }
        };

        let reset_after = if pttl_ms >= 0 {
            Duration::from_millis(pttl_ms as u64)
        } else {
            window
        };

        Ok(CountReply {
            allowed,
            count,
            reset_after,
        })
    }

    async fn uncount(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let mut script = self.uncount.prepare_invoke();
        script.key(key);

        let _: i64 = self.bounded(script.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn current(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = self
            .bounded(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(count)
    }

    async fn time_to_reset(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let pttl_ms: i64 = self
            .bounded(redis::cmd("PTTL").arg(key).query_async(&mut conn))
            .await?;

        // PTTL answers -2 for a missing key and -1 for a key without
        // expiry; neither is a live window.
        if pttl_ms >= 0 {
            Ok(Some(Duration::from_millis(pttl_ms as u64)))
        } else {
            Ok(None)
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .bounded(redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", STORAGE_PREFIX);
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let _: i64 = self
                    .bounded(redis::cmd("DEL").arg(&keys).query_async(&mut conn))
                    .await?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_URL: &str = "redis://127.0.0.1:6379";

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisStore::connect("not a redis url").await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_enforces_limit_and_ttl() {
        let store = RedisStore::connect(TEST_URL).await.unwrap();
        store.clear().await.unwrap();

        let window = Duration::from_secs(60);
        for i in 1..=2 {
            let reply = store
                .check_and_count("rate:redis-test", 2, window)
                .await
                .unwrap();
            assert!(reply.allowed);
            assert_eq!(reply.count, i);
        }

        let reply = store
            .check_and_count("rate:redis-test", 2, window)
            .await
            .unwrap();
        assert!(!reply.allowed);
        assert_eq!(reply.count, 2);
        assert!(reply.reset_after > Duration::ZERO);

        let ttl = store.time_to_reset("rate:redis-test").await.unwrap();
        assert!(ttl.is_some());

        store.clear().await.unwrap();
        assert_eq!(store.current("rate:redis-test").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_uncount_rolls_back() {
        let store = RedisStore::connect(TEST_URL).await.unwrap();
        store.clear().await.unwrap();

        let window = Duration::from_secs(60);
        store
            .check_and_count("rate:redis-uncount", 5, window)
            .await
            .unwrap();
        store
            .check_and_count("rate:redis-uncount", 5, window)
            .await
            .unwrap();

        store.uncount("rate:redis-uncount").await.unwrap();
        assert_eq!(
            store.current("rate:redis-uncount").await.unwrap(),
            Some(1)
        );

        // Rolling back past zero stays at zero.
        store.uncount("rate:redis-uncount").await.unwrap();
        store.uncount("rate:redis-uncount").await.unwrap();
        assert_eq!(
            store.current("rate:redis-uncount").await.unwrap(),
            Some(0)
        );

        store.clear().await.unwrap();
    }
}
