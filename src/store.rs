//! Atomic counter store abstraction and the in-memory reference implementation.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::StoreError;

/// Atomic increment-with-expiry service shared by every worker process.
///
/// Increments to one key must be linearized across all processes sharing the
/// store; this is what turns a per-process counter into a global ceiling.
/// Production deployments back this with a shared key-value store reached
/// over the network (with the client's own bounded timeouts); the in-memory
/// [`MemoryCounterStore`] covers tests and single-process embedders.
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new value.
    ///
    /// A missing or expired key counts from zero, so the first increment of
    /// a fresh window returns 1.
    fn increment(&self, key: &str) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Arm an expiry on `key` only when none is set yet.
    ///
    /// Returns whether this call armed it. The only-if-unset semantics keep
    /// concurrent first increments from repeatedly pushing the deadline back.
    fn expire_if_unset(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Remaining lifetime of `key`, or `None` when absent or without expiry.
    fn ttl(&self, key: &str) -> impl Future<Output = Result<Option<Duration>, StoreError>> + Send;
}

struct CounterEntry {
    count: i64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`CounterStore`] with real TTL behavior.
///
/// Expired entries are reaped lazily on access; the per-key entry lock of the
/// underlying map linearizes increments, matching the contract a shared
/// key-value store provides across processes.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: None,
            });
        if entry.expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }
        entry.count += 1;
        let count = entry.count;
        drop(entry);

        // window keys are never read again after their window passes, so a
        // lazy-only reap would leak one entry per task per window; sweep
        // dead entries whenever a fresh window opens
        if count == 1 {
            self.entries.retain(|_, e| !e.expired(now));
        }

        Ok(count)
    }

    async fn expire_if_unset(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.expires_at.is_none() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        let remaining = self
            .entries
            .get(key)
            .filter(|entry| !entry.expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now));
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_counts_from_one() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment("k").await.unwrap(), 1);
        assert_eq!(store.increment("k").await.unwrap(), 2);
        assert_eq!(store.increment("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_if_unset_is_nx() {
        let store = MemoryCounterStore::new();
        store.increment("k").await.unwrap();

        assert!(store.expire_if_unset("k", Duration::from_secs(60)).await.unwrap());
        // second arm attempt must not reset the deadline
        assert!(!store.expire_if_unset("k", Duration::from_secs(600)).await.unwrap());

        let ttl = store.ttl("k").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_expire_on_missing_key_is_noop() {
        let store = MemoryCounterStore::new();
        assert!(!store.expire_if_unset("absent", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.ttl("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_counts_from_zero_again() {
        let store = MemoryCounterStore::new();
        store.increment("k").await.unwrap();
        store.increment("k").await.unwrap();
        store
            .expire_if_unset("k", Duration::from_millis(20))
            .await
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(store.ttl("k").await.unwrap(), None);
        assert_eq!(store.increment("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dead_window_entries_are_reaped() {
        let store = MemoryCounterStore::new();
        store.increment("old-window").await.unwrap();
        store
            .expire_if_unset("old-window", Duration::from_millis(10))
            .await
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));

        // a fresh window opening on another key sweeps the dead entry out
        store.increment("new-window").await.unwrap();
        assert!(!store.entries.contains_key("old-window"));
        assert!(store.entries.contains_key("new-window"));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        use std::sync::Arc;

        let store = Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment("shared").await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        let expected: Vec<i64> = (1..=100).collect();
        assert_eq!(seen, expected);
    }
}
