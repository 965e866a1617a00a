//! Thread-Safe Time-Series Storage Engine
//!
//! This module implements the in-memory store behind the metrics server.
//! Every metric key owns a series: a map from timestamp (seconds) to value.
//!
//! ## Design Decisions
//!
//! 1. **One Lock**: The whole key space sits behind a single `RwLock`, so a
//!    `get *` always sees one consistent snapshot of every series.
//! 2. **Insertion-Ordered Keys**: The key space is an `IndexMap`, so `get *`
//!    lists keys in the order they were first written.
//! 3. **Ordered Series**: Series are `BTreeMap`s keyed by timestamp, which
//!    gives last-write-wins on duplicate timestamps and ascending reads for free.
//! 4. **Batches**: [`StorageEngine::batch`] holds the write lock for a whole
//!    request, so commands of one batch never interleave with another connection.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │ RwLock<IndexMap<String, BTreeMap<u64, f64>>>          │  │
//! │  │                                                       │  │
//! │  │   "cpu"  -> { 100: 0.5, 160: 0.7 }                    │  │
//! │  │   "mem"  -> { 101: 12.0 }                             │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are created on first `put` and are never removed.

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The key that selects every stored metric in a `get`.
pub const WILDCARD_KEY: &str = "*";

/// A single metric's history, ordered by timestamp.
pub type Series = BTreeMap<u64, f64>;

/// The result of a `get`: metric key to `(timestamp, value)` pairs in
/// ascending timestamp order. Keys keep the order they were first written.
pub type QueryResult = IndexMap<String, Vec<(u64, f64)>>;

type KeySpace = IndexMap<String, Series>;

/// The main storage engine.
///
/// Wrap it in an `Arc` and share it across all connection tasks.
///
/// # Example
///
/// ```
/// use metricstore::storage::StorageEngine;
///
/// let engine = StorageEngine::new();
/// engine.put("cpu", 0.5, 100);
/// engine.put("cpu", 0.7, 160);
///
/// let result = engine.get("cpu");
/// assert_eq!(result["cpu"], vec![(100, 0.5), (160, 0.7)]);
/// ```
pub struct StorageEngine {
    /// Metric key -> series
    data: RwLock<KeySpace>,

    /// Statistics: total PUT operations
    put_count: AtomicU64,

    /// Statistics: total GET operations
    get_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("put_count", &self.put_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(KeySpace::new()),
            put_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
        }
    }

    // Every mutation is a single insert, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, KeySpace> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeySpace> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Records `value` at `timestamp` for `key`.
    ///
    /// Creates the series on first use. A sample already stored at the same
    /// timestamp is overwritten.
    pub fn put(&self, key: &str, value: f64, timestamp: u64) {
        self.batch().put(key, value, timestamp);
    }

    /// Returns the series for `key`, or for every key when `key` is `"*"`.
    ///
    /// An unknown key is returned with an empty series rather than an error.
    pub fn get(&self, key: &str) -> QueryResult {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        query(&self.read(), key)
    }

    /// Takes the write lock for a sequence of operations.
    ///
    /// Nothing else reads or writes the store until the returned batch is
    /// dropped, and each operation sees the effects of the ones before it.
    pub fn batch(&self) -> StorageBatch<'_> {
        StorageBatch {
            engine: self,
            data: self.write(),
        }
    }

    /// Returns the number of metric keys stored.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no metric has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns storage statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            put_ops: self.put_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive access to the store, held until dropped.
pub struct StorageBatch<'a> {
    engine: &'a StorageEngine,
    data: RwLockWriteGuard<'a, KeySpace>,
}

impl StorageBatch<'_> {
    /// Records `value` at `timestamp` for `key`.
    pub fn put(&mut self, key: &str, value: f64, timestamp: u64) {
        self.engine.put_count.fetch_add(1, Ordering::Relaxed);
        match self.data.get_mut(key) {
            Some(series) => {
                series.insert(timestamp, value);
            }
            None => {
                self.data
                    .insert(key.to_string(), Series::from([(timestamp, value)]));
            }
        }
    }

    /// Returns the series for `key`, or for every key when `key` is `"*"`.
    pub fn get(&self, key: &str) -> QueryResult {
        self.engine.get_count.fetch_add(1, Ordering::Relaxed);
        query(&self.data, key)
    }
}

fn query(data: &KeySpace, key: &str) -> QueryResult {
    let flatten = |series: &Series| -> Vec<(u64, f64)> {
        series.iter().map(|(ts, v)| (*ts, *v)).collect()
    };

    if key == WILDCARD_KEY {
        data.iter()
            .map(|(k, series)| (k.clone(), flatten(series)))
            .collect()
    } else {
        let samples = data.get(key).map(flatten).unwrap_or_default();
        QueryResult::from([(key.to_string(), samples)])
    }
}

/// Storage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of metric keys currently stored
    pub keys: u64,
    /// Total PUT operations
    pub put_ops: u64,
    /// Total GET operations
    pub get_ops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let engine = StorageEngine::new();
        engine.put("test", 0.5, 1);
        engine.put("test", 0.4, 2);
        engine.put("load", 301.0, 3);

        let result = engine.get("test");
        assert_eq!(result.len(), 1);
        assert_eq!(result["test"], vec![(1, 0.5), (2, 0.4)]);
    }

    #[test]
    fn test_get_nonexistent() {
        let engine = StorageEngine::new();
        let result = engine.get("key_not_exists");
        assert_eq!(result.len(), 1);
        assert!(result["key_not_exists"].is_empty());
        // Reading never creates a key
        assert!(engine.is_empty());
    }

    #[test]
    fn test_get_all() {
        let engine = StorageEngine::new();
        engine.put("test", 0.5, 1);
        engine.put("test", 0.4, 2);
        engine.put("load", 301.0, 3);

        let result = engine.get(WILDCARD_KEY);
        assert_eq!(result.len(), 2);
        assert_eq!(result["test"], vec![(1, 0.5), (2, 0.4)]);
        assert_eq!(result["load"], vec![(3, 301.0)]);
    }

    #[test]
    fn test_get_all_empty() {
        let engine = StorageEngine::new();
        assert!(engine.get(WILDCARD_KEY).is_empty());
    }

    #[test]
    fn test_overwrite_same_timestamp() {
        let engine = StorageEngine::new();
        engine.put("test", 2.0, 2);
        engine.put("test", 0.4, 2);

        assert_eq!(engine.get("test")["test"], vec![(2, 0.4)]);
    }

    #[test]
    fn test_series_sorted_by_timestamp() {
        let engine = StorageEngine::new();
        for ts in [50, 10, 40, 20, 30] {
            engine.put("cpu", ts as f64 / 10.0, ts);
        }

        let timestamps: Vec<u64> = engine.get("cpu")["cpu"].iter().map(|(ts, _)| *ts).collect();
        assert_eq!(timestamps, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_get_all_keeps_first_write_order() {
        let engine = StorageEngine::new();
        engine.put("test", 0.5, 1);
        engine.put("load", 301.0, 3);
        engine.put("alpha", 1.0, 1);
        engine.put("test", 0.4, 2);

        let keys: Vec<String> = engine.get(WILDCARD_KEY).into_keys().collect();
        assert_eq!(keys, vec!["test", "load", "alpha"]);
    }

    #[test]
    fn test_batch_sees_earlier_operations() {
        let engine = StorageEngine::new();
        {
            let mut batch = engine.batch();
            assert!(batch.get("cpu")["cpu"].is_empty());
            batch.put("cpu", 1.5, 10);
            assert_eq!(batch.get("cpu")["cpu"], vec![(10, 1.5)]);
        }

        // The lock is released once the batch is dropped
        assert_eq!(engine.get("cpu")["cpu"], vec![(10, 1.5)]);
        assert_eq!(engine.stats().put_ops, 1);
        assert_eq!(engine.stats().get_ops, 3);
    }

    #[test]
    fn test_stats() {
        let engine = StorageEngine::new();
        engine.put("a", 1.0, 1);
        engine.put("b", 2.0, 1);
        engine.put("a", 3.0, 2);
        engine.get("a");

        let stats = engine.stats();
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.put_ops, 3);
        assert_eq!(stats.get_ops, 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        // Spawn multiple writers, each on its own key
        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                let key = format!("key-{}", i);
                for j in 0..100 {
                    engine.put(&key, j as f64, j);
                    engine.get(&key);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let all = engine.get(WILDCARD_KEY);
        assert_eq!(all.len(), 10);
        assert!(all.values().all(|series| series.len() == 100));
    }
}
