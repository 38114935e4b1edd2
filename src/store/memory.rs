//! Single-process counter store.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CountReply, CounterStore, StoreError};

/// In-memory counter store over a sharded concurrent map.
///
/// The whole check-and-increment runs while the map entry is held, so
/// concurrent calls for one key are serialized without any locking in
/// the gate itself. State is process-local: limits are not shared
/// across instances, which makes this store suitable for unit tests and
/// single-instance deployments only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Window>,
}

#[derive(Debug)]
struct Window {
    count: u64,
    expires_at: Instant,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn check_and_count(
        &self,
        key: &str,
        max: u32,
        window: Duration,
    ) -> Result<CountReply, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            expires_at: now + window,
        });

        // Expiry is lazy: the first access past the deadline restarts
        // the window.
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }

        let reset_after = entry.expires_at - now;

        if entry.count >= u64::from(max) {
            return Ok(CountReply {
                allowed: false,
                count: entry.count,
                reset_after,
            });
        }

        entry.count += 1;
        Ok(CountReply {
            allowed: true,
            count: entry.count,
            reset_after,
        })
    }

    async fn uncount(&self, key: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.expires_at > Instant::now() && entry.count > 0 {
                entry.count -= 1;
            }
        }
        Ok(())
    }

    async fn current(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.count))
    }

    async fn time_to_reset(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}
