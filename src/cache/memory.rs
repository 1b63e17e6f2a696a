//! Memory Manager Module
//!
//! Measures cache occupancy, classifies pressure and evicts the
//! lowest-priority entries. Runs on its own timer, independent of polling.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::eviction::{select_victims, EvictionCandidate, MemoryPressure, PriorityScorer};
use crate::cache::CacheStore;
use crate::config::KindRegistry;
use crate::events::{EventBus, SyncEvent};
use crate::kind::DataKind;

// == Memory Report ==
/// Outcome of one memory check.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    /// Occupancy before eviction
    pub usage: f64,
    pub pressure: MemoryPressure,
    pub evicted: Vec<DataKind>,
    /// Entries skipped because of minimum retention or optimistic holds
    pub protected: usize,
}

// == Memory Manager ==
/// Pressure-aware eviction over the shared cache store.
#[derive(Debug)]
pub struct MemoryManager {
    store: Arc<RwLock<CacheStore>>,
    kinds: Arc<KindRegistry>,
    scorer: PriorityScorer,
    last_pressure: Mutex<MemoryPressure>,
    bus: EventBus,
}

impl MemoryManager {
    pub fn new(store: Arc<RwLock<CacheStore>>, kinds: Arc<KindRegistry>, bus: EventBus) -> Self {
        Self {
            store,
            kinds,
            scorer: PriorityScorer::default(),
            last_pressure: Mutex::new(MemoryPressure::Normal),
            bus,
        }
    }

    /// Replaces the default score weights.
    pub fn with_scorer(mut self, scorer: PriorityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Pressure observed by the most recent check.
    pub fn pressure(&self) -> MemoryPressure {
        self.last_pressure
            .lock()
            .map(|p| *p)
            .unwrap_or(MemoryPressure::Normal)
    }

    // == Check ==
    /// Classifies pressure and evicts accordingly.
    pub async fn check(&self) -> MemoryReport {
        let mut store = self.store.write().await;
        let now = store.now();
        let usage = store.usage();
        let pressure = MemoryPressure::from_usage(usage);

        self.observe_pressure(pressure, usage);

        let candidates: Vec<EvictionCandidate> = store
            .entries()
            .map(|entry| {
                EvictionCandidate::from_entry(entry, self.kinds.get(&entry.key), &self.scorer, now)
            })
            .collect();
        let protected = candidates.iter().filter(|c| c.protected).count();

        let victims = select_victims(candidates, pressure);
        for key in &victims {
            store.evict(key);
        }

        if victims.is_empty() {
            debug!(
                usage,
                pressure = pressure.as_str(),
                "memory check: nothing to evict"
            );
        } else {
            info!(
                usage,
                pressure = pressure.as_str(),
                evicted = victims.len(),
                protected,
                "memory check: evicted low-priority entries"
            );
        }

        MemoryReport {
            usage,
            pressure,
            evicted: victims,
            protected,
        }
    }

    fn observe_pressure(&self, pressure: MemoryPressure, usage: f64) {
        let previous = match self.last_pressure.lock() {
            Ok(mut last) => std::mem::replace(&mut *last, pressure),
            Err(_) => return,
        };
        if previous == pressure {
            return;
        }

        if pressure > previous {
            warn!(
                from = previous.as_str(),
                to = pressure.as_str(),
                usage,
                "cache memory pressure rising"
            );
        } else {
            info!(
                from = previous.as_str(),
                to = pressure.as_str(),
                "cache memory pressure easing"
            );
        }
        self.bus.emit(SyncEvent::EvictionPressure {
            from: previous,
            to: pressure,
            usage,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DataKindConfig;
    use serde_json::json;

    fn setup(max_entries: usize) -> (MemoryManager, Arc<RwLock<CacheStore>>, Arc<ManualClock>, EventBus) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(RwLock::new(CacheStore::new(max_entries, clock.clone())));
        let mut kinds = KindRegistry::new(DataKindConfig::new(30_000, 300_000, 0, 0.0));
        kinds.insert("fresh", DataKindConfig::new(30_000, 300_000, 600_000, 0.0));
        kinds.insert("vital", DataKindConfig::new(30_000, 300_000, 0, 1_000.0));
        let bus = EventBus::new();
        let manager = MemoryManager::new(store.clone(), Arc::new(kinds), bus.clone());
        (manager, store, clock, bus)
    }

    #[tokio::test]
    async fn test_normal_pressure_keeps_live_entries() {
        let (manager, store, _, _) = setup(100);
        store.write().await.set("a".into(), json!(1));

        let report = manager.check().await;
        assert_eq!(report.pressure, MemoryPressure::Normal);
        assert!(report.evicted.is_empty());
        assert_eq!(store.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_normal_pressure_drops_expired_entries() {
        let (manager, store, clock, _) = setup(100);
        store.write().await.set("old".into(), json!(1));
        clock.advance(400_000);
        store.write().await.set("new".into(), json!(2));

        let report = manager.check().await;
        assert_eq!(report.evicted, vec![DataKind::from("old")]);
    }

    #[tokio::test]
    async fn test_critical_pressure_evicts_lowest_score() {
        let (manager, store, clock, _) = setup(3);
        {
            let mut guard = store.write().await;
            guard.set("cheap".into(), json!(1));
            guard.set("vital".into(), json!(2));
        }
        clock.advance(120_000);
        store.write().await.set("fresh".into(), json!(3));

        let report = manager.check().await;
        assert_eq!(report.pressure, MemoryPressure::Critical);
        assert_eq!(report.evicted, vec![DataKind::from("cheap")]);
        assert_eq!(report.protected, 1);

        let guard = store.read().await;
        assert!(guard.get(&"vital".into()).is_some());
        assert!(guard.get(&"fresh".into()).is_some());
    }

    #[tokio::test]
    async fn test_pressure_transition_emits_event() {
        let (manager, store, _, bus) = setup(5);
        let mut events = bus.subscribe_events();
        {
            let mut guard = store.write().await;
            for key in ["a", "b", "c", "d"] {
                guard.set(key.into(), json!(key));
            }
        }

        manager.check().await;
        assert_eq!(manager.pressure(), MemoryPressure::Warning);

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            SyncEvent::EvictionPressure {
                from: MemoryPressure::Normal,
                to: MemoryPressure::Warning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_pinned_entries_survive_critical_pressure() {
        let (manager, store, clock, _) = setup(1);
        {
            let mut guard = store.write().await;
            guard.set("a".into(), json!(1));
            guard.pin(&"a".into());
        }
        clock.advance(60_000);

        let report = manager.check().await;
        assert!(report.evicted.is_empty());
        assert_eq!(store.read().await.len(), 1);
    }
}
