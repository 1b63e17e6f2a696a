//! Cache Store Module
//!
//! Main cache engine: one entry per data kind with freshness checks,
//! access tracking and serve-stale-on-error bookkeeping.

use std::collections::HashMap;

use serde_json::Value;

use crate::cache::{CacheEntry, CacheStats, ErrorInfo, Freshness};
use crate::clock::SharedClock;
use crate::config::DataKindConfig;
use crate::kind::DataKind;

// == Cache Store ==
/// Main cache storage keyed by data kind.
#[derive(Debug)]
pub struct CacheStore {
    /// Kind-to-entry storage
    entries: HashMap<DataKind, CacheEntry>,
    /// Performance statistics
    stats: CacheStats,
    /// Capacity used for memory pressure
    max_entries: usize,
    /// Time source
    clock: SharedClock,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore with the given capacity.
    ///
    /// # Arguments
    /// * `max_entries` - Capacity the memory manager measures pressure against
    /// * `clock` - Time source for `fetched_at` and access times
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    // == Get ==
    /// Looks up an entry without recording an access.
    pub fn get(&self, key: &DataKind) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Read ==
    /// Looks up an entry as a consumer read: records hit/miss and touches it.
    pub fn read(&mut self, key: &DataKind) -> Option<CacheEntry> {
        let now = self.now();
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                self.stats.record_hit();
                Some(entry.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Touch ==
    /// Updates access counters. Returns false if the key is absent.
    pub fn touch(&mut self, key: &DataKind) -> bool {
        let now = self.now();
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    // == Set ==
    /// Stores a freshly fetched value.
    ///
    /// `fetched_at` becomes now and any attached error is cleared. Access
    /// counters of an existing entry survive the refresh.
    pub fn set(&mut self, key: DataKind, value: Value) {
        let now = self.now();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.fetched_at = now;
                entry.last_error = None;
                entry.speculative = false;
            }
            None => {
                let entry = CacheEntry::new(key.clone(), value, now);
                self.entries.insert(key, entry);
            }
        }
        self.stats.set_total_entries(self.entries.len());
    }

    // == Is Valid ==
    /// Checks whether the entry exists and is younger than `ttl_ms`.
    pub fn is_valid(&self, key: &DataKind, ttl_ms: u64) -> bool {
        let now = self.now();
        self.entries
            .get(key)
            .map(|entry| entry.is_valid(now, ttl_ms))
            .unwrap_or(false)
    }

    // == Freshness ==
    /// Returns the freshness tier of an entry, None when absent.
    pub fn freshness(&self, key: &DataKind, config: &DataKindConfig) -> Option<Freshness> {
        let now = self.now();
        self.entries
            .get(key)
            .map(|entry| entry.freshness(now, config))
    }

    // == Record Error ==
    /// Attaches a refresh failure to an existing entry, keeping its value.
    ///
    /// Returns the attached error, or None when there is no value to keep.
    pub fn record_error(&mut self, key: &DataKind, message: impl Into<String>) -> Option<ErrorInfo> {
        let now = self.now();
        let entry = self.entries.get_mut(key)?;
        let consecutive_failures = entry
            .last_error
            .as_ref()
            .map(|e| e.consecutive_failures + 1)
            .unwrap_or(1);
        let info = ErrorInfo {
            message: message.into(),
            occurred_at: now,
            consecutive_failures,
        };
        entry.last_error = Some(info.clone());
        Some(info)
    }

    pub fn record_stale_served(&mut self) {
        self.stats.record_stale_served();
    }

    pub fn record_discarded(&mut self) {
        self.stats.record_discarded();
    }

    // == Invalidate ==
    /// Removes an entry on request. Returns the removed entry.
    pub fn invalidate(&mut self, key: &DataKind) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.stats.record_invalidation();
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }

    // == Evict ==
    /// Removes an entry chosen by the memory manager.
    pub fn evict(&mut self, key: &DataKind) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.stats.record_eviction();
            self.stats.set_total_entries(self.entries.len());
        }
        removed
    }

    // == Speculative Writes ==
    /// Replaces the visible value without marking it as fetched.
    ///
    /// Returns the value that was visible before, None when the kind was
    /// not cached. In that case a speculative-only entry is created, which
    /// never counts as fresh.
    pub fn write_speculative(&mut self, key: &DataKind, value: Value) -> Option<Value> {
        match self.entries.get_mut(key) {
            Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
            None => {
                let now = self.now();
                self.entries
                    .insert(key.clone(), CacheEntry::speculative(key.clone(), value, now));
                self.stats.set_total_entries(self.entries.len());
                None
            }
        }
    }

    /// Puts back a value captured before a speculative write.
    ///
    /// `None` means the kind was not cached before and removes the entry.
    pub fn restore(&mut self, key: &DataKind, original: Option<Value>) {
        match original {
            Some(value) => {
                if let Some(entry) = self.entries.get_mut(key) {
                    entry.value = value;
                } else {
                    self.set(key.clone(), value);
                }
            }
            None => {
                self.entries.remove(key);
                self.stats.set_total_entries(self.entries.len());
            }
        }
    }

    /// Marks the entry as held by an optimistic operation.
    pub fn pin(&mut self, key: &DataKind) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.pinned += 1;
                true
            }
            None => false,
        }
    }

    /// Releases one optimistic hold on the entry.
    pub fn unpin(&mut self, key: &DataKind) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.pinned = entry.pinned.saturating_sub(1);
        }
    }

    /// Returns true while an optimistic operation holds the entry.
    pub fn is_pinned(&self, key: &DataKind) -> bool {
        self.entries
            .get(key)
            .map(CacheEntry::is_pinned)
            .unwrap_or(false)
    }

    // == Iteration ==
    /// Iterates over all entries.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Usage ==
    /// Occupancy as a fraction of capacity.
    pub fn usage(&self) -> f64 {
        self.entries.len() as f64 / self.max_entries as f64
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn store_with_clock() -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (CacheStore::new(100, clock.clone()), clock)
    }

    fn kind(name: &str) -> DataKind {
        DataKind::from(name)
    }

    #[test]
    fn test_store_new() {
        let (store, _) = store_with_clock();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.max_entries(), 100);
    }

    #[test]
    fn test_store_set_and_read() {
        let (mut store, clock) = store_with_clock();

        store.set(kind("appointments"), json!([{"id": 1}]));
        clock.advance(10);
        let entry = store.read(&kind("appointments")).unwrap();

        assert_eq!(entry.value, json!([{"id": 1}]));
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_accessed_at, 10);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_read_nonexistent() {
        let (mut store, _) = store_with_clock();

        assert!(store.read(&kind("nonexistent")).is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_get_does_not_touch() {
        let (mut store, _) = store_with_clock();
        store.set(kind("staff"), json!([]));

        let _ = store.get(&kind("staff"));
        assert_eq!(store.get(&kind("staff")).unwrap().access_count, 0);
        assert_eq!(store.stats().hits, 0);
    }

    #[test]
    fn test_ttl_window() {
        let (mut store, clock) = store_with_clock();
        store.set(kind("appointments"), json!([]));

        clock.set(20_000);
        assert!(store.is_valid(&kind("appointments"), 30_000));

        clock.set(40_000);
        assert!(!store.is_valid(&kind("appointments"), 30_000));
        assert!(!store.is_valid(&kind("missing"), 30_000));
    }

    #[test]
    fn test_refresh_keeps_access_counters() {
        let (mut store, clock) = store_with_clock();
        store.set(kind("clients"), json!([1]));
        store.read(&kind("clients"));
        store.read(&kind("clients"));

        clock.advance(5_000);
        store.set(kind("clients"), json!([1, 2]));

        let entry = store.get(&kind("clients")).unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.fetched_at, 5_000);
        assert_eq!(entry.value, json!([1, 2]));
    }

    #[test]
    fn test_record_error_keeps_value() {
        let (mut store, _) = store_with_clock();
        store.set(kind("appointments"), json!(["good"]));

        let first = store.record_error(&kind("appointments"), "timeout").unwrap();
        let second = store.record_error(&kind("appointments"), "timeout").unwrap();

        assert_eq!(first.consecutive_failures, 1);
        assert_eq!(second.consecutive_failures, 2);
        let entry = store.get(&kind("appointments")).unwrap();
        assert_eq!(entry.value, json!(["good"]));
        assert!(entry.last_error.is_some());

        store.set(kind("appointments"), json!(["newer"]));
        assert!(store.get(&kind("appointments")).unwrap().last_error.is_none());
    }

    #[test]
    fn test_record_error_without_value() {
        let (mut store, _) = store_with_clock();
        assert!(store.record_error(&kind("appointments"), "timeout").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalidate_and_evict_counters() {
        let (mut store, _) = store_with_clock();
        store.set(kind("a"), json!(1));
        store.set(kind("b"), json!(2));

        assert!(store.invalidate(&kind("a")).is_some());
        assert!(store.invalidate(&kind("a")).is_none());
        assert!(store.evict(&kind("b")).is_some());

        let stats = store.stats();
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_speculative_write_and_restore() {
        let (mut store, clock) = store_with_clock();
        store.set(kind("clients"), json!(["server"]));
        clock.advance(1_000);

        let previous = store.write_speculative(&kind("clients"), json!(["guess"]));
        assert_eq!(previous, Some(json!(["server"])));
        let entry = store.get(&kind("clients")).unwrap();
        assert_eq!(entry.value, json!(["guess"]));
        assert_eq!(entry.fetched_at, 0, "speculative writes do not refresh");

        store.restore(&kind("clients"), previous);
        assert_eq!(store.get(&kind("clients")).unwrap().value, json!(["server"]));
    }

    #[test]
    fn test_restore_none_removes_entry() {
        let (mut store, _) = store_with_clock();
        assert!(store.write_speculative(&kind("notes"), json!("draft")).is_none());
        assert_eq!(store.len(), 1);

        store.restore(&kind("notes"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_speculative_only_entry_is_not_valid_until_fetched() {
        let (mut store, _) = store_with_clock();
        let config = DataKindConfig::new(30_000, 300_000, 0, 1.0);
        store.write_speculative(&kind("notifications"), json!([{"id": "temp-1"}]));

        assert!(!store.is_valid(&kind("notifications"), 30_000));
        assert_eq!(store.freshness(&kind("notifications"), &config), Some(Freshness::Expired));

        store.set(kind("notifications"), json!([{"id": "n1"}]));
        assert!(store.is_valid(&kind("notifications"), 30_000));
        assert!(!store.get(&kind("notifications")).unwrap().speculative);
    }

    #[test]
    fn test_pin_unpin() {
        let (mut store, _) = store_with_clock();
        assert!(!store.pin(&kind("clients")));

        store.set(kind("clients"), json!([]));
        assert!(store.pin(&kind("clients")));
        assert!(store.pin(&kind("clients")));
        store.unpin(&kind("clients"));
        assert!(store.is_pinned(&kind("clients")));
        store.unpin(&kind("clients"));
        store.unpin(&kind("clients"));
        assert!(!store.is_pinned(&kind("clients")));
    }

    #[test]
    fn test_usage() {
        let clock = Arc::new(ManualClock::new(0));
        let mut store = CacheStore::new(4, clock);
        store.set(kind("a"), json!(1));
        store.set(kind("b"), json!(2));
        store.set(kind("c"), json!(3));

        assert_eq!(store.usage(), 0.75);
    }
}
