//! Cache backend contract (spec.md §4.A, §6).
//!
//! Seesaw-style policy-light interface: the scheduler core owns no
//! particular backend, only the operations it invokes. A network
//! key/value store with sorted sets and atomic set-if-absent is assumed;
//! any backend satisfying this trait is acceptable.
//!
//! # Failure model
//!
//! All operations fail softly: failures are logged by the caller, which
//! must have an in-memory fallback (the dead-letter queue, execution
//! history) and must tolerate eventual consistency between the cache and
//! process state. This trait itself never panics; it returns
//! [`crate::error::SchedulerError::Transient`] on backend failure.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, SchedulerError};

/// Abstract K/V + set + sorted-set cache with TTLs.
///
/// Namespacing conventions (spec.md §6 persisted state layout):
/// `job:cache:`, `worker:cache:`, `job:priority:queue`,
/// `job:processing:queue`, `job:failed:queue`, `job:completed:queue`,
/// `dlq:job:<id>`, `dlq:index`, `worker:blacklist:<id>`, `job:lock:<id>`.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store a value with an optional TTL.
    async fn put(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()>;

    /// Fetch the raw stored value, or `None` if absent or expired.
    ///
    /// Kept as `serde_json::Value` rather than a generic return type so
    /// `Cache` stays object-safe (`Arc<dyn Cache>` is how every component
    /// in this crate holds it). Use [`get_typed`] to deserialize.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Remove a key.
    async fn evict(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`.
    async fn evict_by_prefix(&self, prefix: &str) -> Result<()>;

    /// Add a member to a set.
    async fn set_add(&self, key: &str, value: &str) -> Result<()>;

    /// List all members of a set.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Remove a member from a set.
    async fn set_remove(&self, key: &str, value: &str) -> Result<()>;

    /// Count members of a set.
    async fn set_cardinality(&self, key: &str) -> Result<u64>;

    /// Add a member to a sorted set with an explicit score.
    async fn sorted_set_add(&self, key: &str, value: &str, score: f64) -> Result<()>;

    /// Atomically pop the `n` lowest-scored members.
    async fn sorted_set_pop_min(&self, key: &str, n: usize) -> Result<Vec<(String, f64)>>;

    /// Return members with score in `[lo, hi]`, ascending.
    async fn sorted_set_range(&self, key: &str, lo: f64, hi: f64) -> Result<Vec<(String, f64)>>;

    /// Remove a member from a sorted set.
    async fn sorted_set_remove(&self, key: &str, value: &str) -> Result<()>;

    /// Look up the score of a member, if present.
    async fn sorted_set_score(&self, key: &str, value: &str) -> Result<Option<f64>>;

    /// Count members with score in `[lo, hi]`.
    async fn sorted_set_count(&self, key: &str, lo: f64, hi: f64) -> Result<u64>;

    /// Atomic lock primitive: set `key` to `value` with `ttl` only if
    /// absent. Returns `true` if the lock was acquired.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Liveness probe for the backend.
    async fn ping(&self) -> Result<()>;
}

/// Serialize a value for [`Cache::put`], matching the `serde_json::Value`
/// payload shape every operation above uses at the wire boundary.
pub fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| SchedulerError::Validation(e.to_string()))
}

/// Fetch and deserialize a value from any `Cache` implementation,
/// including through a `dyn Cache` trait object.
pub async fn get_typed<T: DeserializeOwned>(cache: &(impl Cache + ?Sized), key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(v) => Ok(Some(serde_json::from_value(v).map_err(|e| SchedulerError::Validation(e.to_string()))?)),
        None => Ok(None),
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory reference implementation of [`Cache`] for tests.

    use super::*;
    use dashmap::DashMap;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use std::time::Instant;

    struct Entry {
        value: serde_json::Value,
        expires_at: Option<Instant>,
    }

    /// In-memory [`Cache`] backed by `dashmap`, sufficient for unit and
    /// scenario tests. Not durable across process restarts.
    #[derive(Default)]
    pub struct InMemoryCache {
        kv: DashMap<String, Entry>,
        sets: DashMap<String, HashSet<String>>,
        sorted_sets: DashMap<String, Mutex<BTreeMap<String, f64>>>,
    }

    impl InMemoryCache {
        pub fn new() -> Self {
            Self::default()
        }

        fn is_live(entry: &Entry) -> bool {
            entry.expires_at.map(|t| t > Instant::now()).unwrap_or(true)
        }
    }

    #[async_trait]
    impl Cache for InMemoryCache {
        async fn put(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
            self.kv.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: ttl.map(|d| Instant::now() + d),
                },
            );
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
            match self.kv.get(key) {
                Some(entry) if Self::is_live(&entry) => Ok(Some(entry.value.clone())),
                _ => Ok(None),
            }
        }

        async fn evict(&self, key: &str) -> Result<()> {
            self.kv.remove(key);
            Ok(())
        }

        async fn evict_by_prefix(&self, prefix: &str) -> Result<()> {
            let doomed: Vec<String> = self
                .kv
                .iter()
                .filter(|e| e.key().starts_with(prefix))
                .map(|e| e.key().clone())
                .collect();
            for k in doomed {
                self.kv.remove(&k);
            }
            Ok(())
        }

        async fn set_add(&self, key: &str, value: &str) -> Result<()> {
            self.sets.entry(key.to_string()).or_default().insert(value.to_string());
            Ok(())
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>> {
            Ok(self.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
        }

        async fn set_remove(&self, key: &str, value: &str) -> Result<()> {
            if let Some(mut s) = self.sets.get_mut(key) {
                s.remove(value);
            }
            Ok(())
        }

        async fn set_cardinality(&self, key: &str) -> Result<u64> {
            Ok(self.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
        }

        async fn sorted_set_add(&self, key: &str, value: &str, score: f64) -> Result<()> {
            self.sorted_sets
                .entry(key.to_string())
                .or_insert_with(|| Mutex::new(BTreeMap::new()))
                .lock()
                .unwrap()
                .insert(value.to_string(), score);
            Ok(())
        }

        async fn sorted_set_pop_min(&self, key: &str, n: usize) -> Result<Vec<(String, f64)>> {
            let Some(set) = self.sorted_sets.get(key) else {
                return Ok(Vec::new());
            };
            let mut guard = set.lock().unwrap();
            let mut entries: Vec<(String, f64)> = guard.iter().map(|(k, v)| (k.clone(), *v)).collect();
            entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let popped: Vec<(String, f64)> = entries.into_iter().take(n).collect();
            for (k, _) in &popped {
                guard.remove(k);
            }
            Ok(popped)
        }

        async fn sorted_set_range(&self, key: &str, lo: f64, hi: f64) -> Result<Vec<(String, f64)>> {
            let Some(set) = self.sorted_sets.get(key) else {
                return Ok(Vec::new());
            };
            let guard = set.lock().unwrap();
            let mut entries: Vec<(String, f64)> = guard
                .iter()
                .filter(|(_, score)| **score >= lo && **score <= hi)
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            Ok(entries)
        }

        async fn sorted_set_remove(&self, key: &str, value: &str) -> Result<()> {
            if let Some(set) = self.sorted_sets.get(key) {
                set.lock().unwrap().remove(value);
            }
            Ok(())
        }

        async fn sorted_set_score(&self, key: &str, value: &str) -> Result<Option<f64>> {
            Ok(self.sorted_sets.get(key).and_then(|s| s.lock().unwrap().get(value).copied()))
        }

        async fn sorted_set_count(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
            Ok(self.sorted_set_range(key, lo, hi).await?.len() as u64)
        }

        async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
            use dashmap::mapref::entry::Entry as DEntry;
            match self.kv.entry(key.to_string()) {
                DEntry::Occupied(e) if Self::is_live(e.get()) => Ok(false),
                entry => {
                    entry.insert(Entry {
                        value: serde_json::Value::String(value.to_string()),
                        expires_at: Some(Instant::now() + ttl),
                    });
                    Ok(true)
                }
            }
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn set_if_absent_is_a_one_shot_lock() {
        let cache = InMemoryCache::new();
        assert!(cache.set_if_absent("job:lock:1", "holder", Duration::from_secs(5)).await.unwrap());
        assert!(!cache.set_if_absent("job:lock:1", "other", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_pop_min_returns_lowest_scores_first() {
        let cache = InMemoryCache::new();
        cache.sorted_set_add("q", "a", 5.0).await.unwrap();
        cache.sorted_set_add("q", "b", 1.0).await.unwrap();
        cache.sorted_set_add("q", "c", 3.0).await.unwrap();
        let popped = cache.sorted_set_pop_min("q", 2).await.unwrap();
        assert_eq!(popped, vec![("b".to_string(), 1.0), ("c".to_string(), 3.0)]);
    }

    #[tokio::test]
    async fn evict_by_prefix_removes_only_matching_keys() {
        let cache = InMemoryCache::new();
        cache.put("job:cache:1", serde_json::json!(1), None).await.unwrap();
        cache.put("worker:cache:1", serde_json::json!(1), None).await.unwrap();
        cache.evict_by_prefix("job:cache:").await.unwrap();
        assert_eq!(cache.kv.len(), 1);
    }
}
