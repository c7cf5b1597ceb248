//! In-memory counter store with explicit expiry bookkeeping.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{CounterStore, StoreResult};

/// A stored integer and the instant it stops being visible.
#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    /// `None` means the entry never expires.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// A map-backed counter store for tests and single-process deployments.
///
/// Each key is guarded by its shard lock for the whole read-modify-write,
/// so increments on the same key are serialized.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that have not expired yet.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    fn live(&self, key: &str, now: Instant) -> Option<Entry> {
        self.entries
            .get(key)
            .map(|e| *e)
            .filter(|e| !e.is_expired(now))
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_with_expiry(&self, key: &str, window_secs: u64) -> StoreResult<i64> {
        let now = Instant::now();
        let window = Duration::from_secs(window_secs);

        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });

        if entry.is_expired(now) {
            entry.value = 0;
        }

        entry.value += 1;
        entry.expires_at = Some(now + window);
        Ok(entry.value)
    }

    async fn get(&self, key: &str) -> StoreResult<i64> {
        Ok(self.live(key, Instant::now()).map_or(0, |e| e.value))
    }

    async fn get_ttl_seconds(&self, key: &str) -> StoreResult<i64> {
        let now = Instant::now();
        let remaining = self
            .live(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);

        // Round to the nearest second, as Redis does for TTL.
        Ok(((remaining.as_millis() + 500) / 1000) as i64)
    }

    async fn set_with_expiry(&self, key: &str, value: i64, window_secs: u64) -> StoreResult<()> {
        let expires_at =
            (window_secs > 0).then(|| Instant::now() + Duration::from_secs(window_secs));
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}
