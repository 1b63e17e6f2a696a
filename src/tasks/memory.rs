//! Memory Check Task
//!
//! Background task that periodically runs the memory manager's pressure
//! check, and runs it early when a fetch overflows the cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::MemoryManager;

/// Spawns a background task that checks cache memory pressure.
///
/// The task runs in an infinite loop, waiting for either the interval to
/// elapse or `overflow` to be notified, then evicts according to the
/// current pressure level.
///
/// # Arguments
/// * `manager` - shared memory manager over the cache store
/// * `check_interval_ms` - milliseconds between regular checks
/// * `overflow` - notified when a write leaves the cache above capacity
///
/// # Returns
/// A JoinHandle for the spawned task, aborted during shutdown.
pub fn spawn_memory_task(
    manager: Arc<MemoryManager>,
    check_interval_ms: u64,
    overflow: Arc<Notify>,
) -> JoinHandle<()> {
    let interval = Duration::from_millis(check_interval_ms);

    tokio::spawn(async move {
        info!(interval_ms = check_interval_ms, "Starting memory check task");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = overflow.notified() => {
                    debug!("cache over capacity, checking early");
                }
            }

            let report = manager.check().await;
            if !report.evicted.is_empty() {
                debug!(
                    evicted = report.evicted.len(),
                    pressure = report.pressure.as_str(),
                    "memory check finished"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::clock::ManualClock;
    use crate::config::{DataKindConfig, KindRegistry};
    use crate::events::EventBus;
    use serde_json::json;
    use tokio::sync::RwLock;

    fn setup(max_entries: usize) -> (Arc<MemoryManager>, Arc<RwLock<CacheStore>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(RwLock::new(CacheStore::new(max_entries, clock.clone())));
        let kinds = KindRegistry::new(DataKindConfig::new(1_000, 10_000, 0, 0.0));
        let manager = Arc::new(MemoryManager::new(store.clone(), Arc::new(kinds), EventBus::new()));
        (manager, store, clock)
    }

    #[tokio::test]
    async fn test_memory_task_removes_expired_entries() {
        let (manager, store, clock) = setup(100);
        store.write().await.set("expire_soon".into(), json!(1));
        clock.advance(20_000);

        let handle = spawn_memory_task(manager, 20, Arc::new(Notify::new()));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(
            store.read().await.get(&"expire_soon".into()).is_none(),
            "Expired entry should have been evicted"
        );
        handle.abort();
    }

    #[tokio::test]
    async fn test_memory_task_preserves_live_entries() {
        let (manager, store, _) = setup(100);
        store.write().await.set("long_lived".into(), json!("value"));

        let handle = spawn_memory_task(manager, 20, Arc::new(Notify::new()));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            store.read().await.get(&"long_lived".into()).unwrap().value,
            json!("value")
        );
        handle.abort();
    }

    #[tokio::test]
    async fn test_overflow_triggers_early_check() {
        let (manager, store, clock) = setup(2);
        {
            let mut guard = store.write().await;
            guard.set("a".into(), json!(1));
            guard.set("b".into(), json!(2));
            guard.set("c".into(), json!(3));
        }
        clock.advance(5_000);
        let overflow = Arc::new(Notify::new());

        let handle = spawn_memory_task(manager, 60_000, overflow.clone());
        overflow.notify_one();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.read().await.len() < 3, "overflow should evict without waiting");
        handle.abort();
    }

    #[tokio::test]
    async fn test_memory_task_can_be_aborted() {
        let (manager, _, _) = setup(10);
        let handle = spawn_memory_task(manager, 1_000, Arc::new(Notify::new()));

        handle.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
