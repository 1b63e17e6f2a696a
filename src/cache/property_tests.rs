//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check freshness, eviction, pressure, deduplication and
//! rollback behavior over generated inputs.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::cache::{
    eviction::select_victims, CacheEntry, CacheStore, EvictionCandidate, Freshness,
    MemoryPressure, SchemaRegistry,
};
use crate::clock::ManualClock;
use crate::config::{DataKindConfig, KindRegistry};
use crate::error::SyncError;
use crate::events::EventBus;
use crate::kind::DataKind;
use crate::optimistic::{OptimisticEngine, Target};
use crate::sync::testing::ScriptedClient;
use crate::sync::Fetcher;

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;

// == Strategies ==
fn kind_strategy() -> impl Strategy<Value = String> {
    "[a-z_]{1,16}"
}

#[derive(Debug, Clone)]
enum StoreOp {
    Set { key: String, value: i64 },
    Read { key: String },
    Invalidate { key: String },
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        (kind_strategy(), any::<i64>()).prop_map(|(key, value)| StoreOp::Set { key, value }),
        kind_strategy().prop_map(|key| StoreOp::Read { key }),
        kind_strategy().prop_map(|key| StoreOp::Invalidate { key }),
    ]
}

fn candidate_strategy() -> impl Strategy<Value = (f64, bool, bool)> {
    (-1000.0f64..1000.0, any::<bool>(), any::<bool>())
}

fn pressure_strategy() -> impl Strategy<Value = MemoryPressure> {
    prop_oneof![
        Just(MemoryPressure::Normal),
        Just(MemoryPressure::Warning),
        Just(MemoryPressure::Critical),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Reads are counted as hits exactly when a value is cached.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(store_op_strategy(), 1..50)) {
        let mut store = CacheStore::new(TEST_MAX_ENTRIES, Arc::new(ManualClock::new(0)));
        let mut present: HashSet<String> = HashSet::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;
        let mut expected_invalidations: u64 = 0;

        for op in ops {
            match op {
                StoreOp::Set { key, value } => {
                    store.set(DataKind::new(key.clone()), json!(value));
                    present.insert(key);
                }
                StoreOp::Read { key } => {
                    let found = store.read(&DataKind::new(key.clone())).is_some();
                    prop_assert_eq!(found, present.contains(&key));
                    if found { expected_hits += 1 } else { expected_misses += 1 }
                }
                StoreOp::Invalidate { key } => {
                    if store.invalidate(&DataKind::new(key.clone())).is_some() {
                        expected_invalidations += 1;
                    }
                    present.remove(&key);
                }
            }
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.invalidations, expected_invalidations);
        prop_assert_eq!(stats.total_entries, present.len());
        prop_assert_eq!(store.len(), present.len());
    }

    // An entry is valid for ages [0, ttl) and stale from ttl on.
    #[test]
    fn prop_ttl_boundary(ttl_ms in 1u64..1_000_000, age_ms in 0u64..3_000_000) {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut store = CacheStore::new(TEST_MAX_ENTRIES, clock.clone());
        let key = DataKind::new("appointments");
        store.set(key.clone(), json!([]));

        clock.advance(age_ms);
        prop_assert_eq!(store.is_valid(&key, ttl_ms), age_ms < ttl_ms);
    }

    // Freshness bands: fresh < ttl <= stale < 2·ttl <= expired, capped by max age.
    #[test]
    fn prop_freshness_bands(
        ttl_ms in 1u64..100_000,
        max_age_ms in 1u64..500_000,
        age_ms in 0u64..600_000,
    ) {
        let config = DataKindConfig::new(ttl_ms, max_age_ms, 0, 1.0);
        let entry = CacheEntry::new(DataKind::new("staff"), json!([]), 0);

        let expected = if age_ms >= max_age_ms || age_ms >= ttl_ms * 2 {
            Freshness::Expired
        } else if age_ms < ttl_ms {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
        prop_assert_eq!(entry.freshness(age_ms, &config), expected);
    }

    // Pressure never decreases as usage grows.
    #[test]
    fn prop_pressure_monotonic(a in 0.0f64..1.5, b in 0.0f64..1.5) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(MemoryPressure::from_usage(low) <= MemoryPressure::from_usage(high));
    }

    // Victims are unprotected, within budget, and nothing eligible that was
    // kept scores lower than something evicted.
    #[test]
    fn prop_victim_selection(
        specs in prop::collection::vec(candidate_strategy(), 0..40),
        pressure in pressure_strategy(),
    ) {
        let candidates: Vec<EvictionCandidate> = specs
            .iter()
            .enumerate()
            .map(|(i, (score, protected, expired))| EvictionCandidate {
                key: DataKind::new(format!("k{i}")),
                score: *score,
                protected: *protected,
                expired: *expired,
            })
            .collect();

        let victims: HashSet<DataKind> =
            select_victims(candidates.clone(), pressure).into_iter().collect();

        let total = candidates.len();
        let budget = match pressure {
            MemoryPressure::Normal => (total as f64 * 0.10).ceil() as usize,
            _ => ((total as f64 * pressure.eviction_fraction()).floor() as usize).max(1),
        };
        prop_assert!(victims.len() <= budget.min(total));

        let eligible = |c: &EvictionCandidate| {
            !c.protected && (pressure != MemoryPressure::Normal || c.expired)
        };
        for c in candidates.iter().filter(|c| victims.contains(&c.key)) {
            prop_assert!(eligible(c), "ineligible victim {:?}", c);
        }

        let max_victim = candidates
            .iter()
            .filter(|c| victims.contains(&c.key))
            .map(|c| c.score)
            .fold(f64::NEG_INFINITY, f64::max);
        for kept in candidates.iter().filter(|c| eligible(c) && !victims.contains(&c.key)) {
            prop_assert!(kept.score >= max_victim);
        }

        let eligible_count = candidates.iter().filter(|c| eligible(c)).count();
        prop_assert_eq!(victims.len(), eligible_count.min(budget));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    // Any number of concurrent fetches of one kind share a single network call.
    #[test]
    fn prop_concurrent_fetches_deduplicate(consumers in 1usize..12) {
        let (calls, values) = tokio_test::block_on(async move {
            let client = Arc::new(ScriptedClient::new(Duration::from_millis(5)));
            client.respond("appointments", Ok(json!([{"id": 1}])));
            let clock = Arc::new(ManualClock::new(0));
            let store = Arc::new(RwLock::new(CacheStore::new(TEST_MAX_ENTRIES, clock.clone())));
            let fetcher = Fetcher::new(
                client.clone(),
                store,
                Arc::new(KindRegistry::default()),
                SchemaRegistry::with_defaults(),
                EventBus::new(),
                clock,
                10,
            );

            let key = DataKind::new("appointments");
            let results =
                futures::future::join_all((0..consumers).map(|_| fetcher.fetch_data_kind(&key))).await;
            let values: Vec<Value> = results.into_iter().map(|r| r.unwrap().value).collect();
            (client.calls("appointments"), values)
        });

        prop_assert_eq!(calls, 1);
        prop_assert_eq!(values.len(), consumers);
        for value in values {
            prop_assert_eq!(value, json!([{"id": 1}]));
        }
    }

    // After any sequence of resolved updates the cache shows the last
    // committed value (or the starting value), and rolling back a resolved
    // operation again changes nothing.
    #[test]
    fn prop_rollback_idempotent(ops in prop::collection::vec((any::<i32>(), any::<bool>()), 1..12)) {
        let outcome = tokio_test::block_on(async move {
            let clock = Arc::new(ManualClock::new(0));
            let store = Arc::new(RwLock::new(CacheStore::new(TEST_MAX_ENTRIES, clock)));
            let engine = OptimisticEngine::new(store.clone(), EventBus::new(), Duration::ZERO);
            let key = DataKind::new("dashboard_stats");
            store.write().await.set(key.clone(), json!({"total": -1}));

            let mut expected = json!({"total": -1});
            let mut resolved = Vec::new();
            for (total, succeed) in ops {
                let value = json!({"total": total});
                let server = value.clone();
                let result = engine
                    .update_value(&key, value.clone(), async move {
                        if succeed { Ok(server) } else { Err("rejected".to_string()) }
                    })
                    .await;
                match result {
                    Ok(outcome) => {
                        expected = value;
                        resolved.push(outcome.operation_id);
                    }
                    Err(SyncError::OptimisticUpdateFailure { operation_id, .. }) => {
                        resolved.push(operation_id);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }

            let before = store.read().await.get(&key).map(|e| e.value.clone());
            let target = Target::kind(key.as_str());
            let mut repeated = Vec::new();
            for id in resolved {
                repeated.push(engine.rollback(&target, id).await);
            }
            let after = store.read().await.get(&key).map(|e| e.value.clone());
            let pinned = store.read().await.is_pinned(&key);
            (expected, before, after, repeated, pinned, engine.pending_count())
        });

        let (expected, before, after, repeated, pinned, pending) = outcome;
        prop_assert_eq!(before.as_ref(), Some(&expected));
        prop_assert_eq!(after, before);
        prop_assert!(repeated.iter().all(|applied| !applied));
        prop_assert!(!pinned);
        prop_assert_eq!(pending, 0);
    }
}
