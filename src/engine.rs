//! Sync Engine
//!
//! One service object per session that owns the cache and every component
//! around it. Construct it once, call `init()` to start the background
//! tasks and `shutdown()` to stop them.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastMessage, CrossTabBroadcaster, SharedStorage};
use crate::cache::{CacheEntry, CacheStats, CacheStore, MemoryManager, MemoryPressure, SchemaRegistry};
use crate::client::RequestClient;
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::events::{DataUpdate, EventBus, SyncEvent, UpdateOrigin};
use crate::kind::DataKind;
use crate::optimistic::{OptimisticEngine, OptimisticOutcome, Target};
use crate::sync::{
    lock, FetchOutcome, FetchStats, Fetcher, PollerState, PollingCoordinator, SubscribeOptions,
    SubscriptionHandle,
};
use crate::tasks::spawn_memory_task;

/// Cross-tab event: a kind was invalidated; payload `{ kind }`
pub const EVENT_CACHE_INVALIDATED: &str = "cache_invalidated";
/// Cross-tab event: an optimistic update committed; payload `{ kind, value }`
pub const EVENT_DATA_COMMITTED: &str = "data_committed";
/// Cross-tab event: an optimistic update rolled back; payload `{ kind }`
pub const EVENT_DATA_ROLLED_BACK: &str = "data_rolled_back";

// == Engine Stats ==
/// Snapshot of the engine for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cache: CacheStats,
    pub hit_rate: f64,
    pub usage: f64,
    pub max_entries: usize,
    pub pressure: MemoryPressure,
    pub fetch: FetchStats,
    pub in_flight: usize,
    pub poller: PollerState,
    pub subscriptions: usize,
    pub pending_optimistic: usize,
    pub origin: String,
}

// == Sync Engine ==
pub struct SyncEngine {
    config: Config,
    store: Arc<RwLock<CacheStore>>,
    bus: EventBus,
    fetcher: Fetcher,
    poller: Arc<PollingCoordinator>,
    memory: Arc<MemoryManager>,
    optimistic: Arc<OptimisticEngine>,
    broadcaster: Arc<CrossTabBroadcaster>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(config: Config, client: Arc<dyn RequestClient>, storage: Arc<dyn SharedStorage>) -> Self {
        Self::with_clock(config, client, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        client: Arc<dyn RequestClient>,
        storage: Arc<dyn SharedStorage>,
        clock: SharedClock,
    ) -> Self {
        let store = Arc::new(RwLock::new(CacheStore::new(config.max_entries, clock.clone())));
        let kinds = Arc::new(config.kinds.clone());
        let bus = EventBus::new();

        let fetcher = Fetcher::new(
            client,
            store.clone(),
            kinds.clone(),
            SchemaRegistry::with_defaults(),
            bus.clone(),
            clock.clone(),
            config.polling.error_window,
        );
        let poller = PollingCoordinator::new(fetcher.clone(), config.polling.clone(), config.slow_fetch_warn_ms);
        let memory = Arc::new(MemoryManager::new(store.clone(), kinds, bus.clone()));
        let optimistic = OptimisticEngine::new(
            store.clone(),
            bus.clone(),
            Duration::from_millis(config.rollback_delay_ms),
        );
        let broadcaster = Arc::new(CrossTabBroadcaster::new(
            storage,
            clock,
            Duration::from_millis(config.broadcast_cleanup_ms),
        ));

        Self {
            config,
            store,
            bus,
            fetcher,
            poller,
            memory,
            optimistic,
            broadcaster,
            tasks: Mutex::new(Vec::new()),
        }
    }

    // == Lifecycle ==
    /// Starts the memory manager, the cross-tab listener and the relays
    /// between the event bus and sibling engines. Calling it twice is a no-op.
    pub fn init(&self) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            return;
        }

        tasks.push(spawn_memory_task(
            self.memory.clone(),
            self.config.memory_check_interval_ms,
            self.fetcher.overflow_signal(),
        ));

        // Subscribe before starting the listener so no sibling event is missed.
        let remote = self.broadcaster.subscribe();
        self.broadcaster.start();
        tasks.push(spawn_remote_applier(
            remote,
            self.broadcaster.origin().to_string(),
            self.store.clone(),
            self.bus.clone(),
        ));
        tasks.push(spawn_outcome_relay(self.bus.subscribe_updates(), self.broadcaster.clone()));

        info!(
            origin = %self.broadcaster.origin(),
            max_entries = self.config.max_entries,
            "sync engine started"
        );
    }

    /// Stops polling, background tasks and pending rollbacks.
    pub fn shutdown(&self) {
        self.poller.shutdown();
        self.optimistic.shutdown();
        self.broadcaster.stop();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        info!("sync engine stopped");
    }

    // == Subscriptions ==
    pub async fn subscribe(
        &self,
        consumer_id: &str,
        data_kinds: impl IntoIterator<Item = DataKind>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        self.poller.subscribe(consumer_id, data_kinds, options).await
    }

    pub fn unsubscribe(&self, consumer_id: &str) -> bool {
        self.poller.unsubscribe(consumer_id)
    }

    pub fn poller(&self) -> &Arc<PollingCoordinator> {
        &self.poller
    }

    // == Reads ==
    /// Stale-while-revalidate read of a kind.
    pub async fn load(&self, kind: &DataKind) -> Result<FetchOutcome> {
        validate(kind)?;
        self.fetcher.load(kind).await
    }

    /// Deduplicated fetch of a kind.
    pub async fn fetch(&self, kind: &DataKind) -> Result<FetchOutcome> {
        validate(kind)?;
        self.fetcher.fetch_data_kind(kind).await
    }

    /// Fetches a kind even if a request is outstanding.
    pub async fn refresh(&self, kind: &DataKind) -> Result<FetchOutcome> {
        validate(kind)?;
        self.fetcher.refresh(kind).await
    }

    /// Cached entry without side effects.
    pub async fn peek(&self, kind: &DataKind) -> Option<CacheEntry> {
        self.store.read().await.get(kind).cloned()
    }

    // == Invalidate ==
    /// Drops a kind locally and in sibling engines.
    ///
    /// Returns false when nothing was cached.
    pub async fn invalidate(&self, kind: &DataKind) -> Result<bool> {
        validate(kind)?;
        let removed = self.store.write().await.invalidate(kind).is_some();

        if removed {
            info!(%kind, "cache entry invalidated");
            self.bus.publish(DataUpdate {
                kind: kind.clone(),
                value: None,
                error: None,
                origin: UpdateOrigin::Invalidated,
            });
        }
        self.broadcaster
            .broadcast(EVENT_CACHE_INVALIDATED, json!({ "kind": kind }))?;
        Ok(removed)
    }

    // == Optimistic Updates ==
    pub async fn update_value<F, E>(&self, kind: &DataKind, value: Value, operation: F) -> Result<OptimisticOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        validate(kind)?;
        self.optimistic.update_value(kind, value, operation).await
    }

    pub async fn add_item<F, Fut, E>(&self, kind: &DataKind, item: Value, operation: F) -> Result<OptimisticOutcome>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        validate(kind)?;
        self.optimistic.add_item(kind, item, operation).await
    }

    pub async fn update_item<F, E>(&self, kind: &DataKind, id: &str, patch: Value, operation: F) -> Result<OptimisticOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        validate(kind)?;
        self.optimistic.update_item(kind, id, patch, operation).await
    }

    pub async fn remove_item<F, E>(&self, kind: &DataKind, id: &str, operation: F) -> Result<OptimisticOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        validate(kind)?;
        self.optimistic.remove_item(kind, id, operation).await
    }

    pub async fn rollback(&self, target: &Target, operation_id: u64) -> bool {
        self.optimistic.rollback(target, operation_id).await
    }

    pub fn optimistic(&self) -> &Arc<OptimisticEngine> {
        &self.optimistic
    }

    // == Activity ==
    pub fn record_interaction(&self) {
        self.poller.record_interaction();
    }

    pub fn set_visibility(&self, visible: bool) {
        self.poller.set_visibility(visible);
    }

    // == Observability ==
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe_events()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<DataUpdate> {
        self.bus.subscribe_updates()
    }

    pub fn broadcaster(&self) -> &Arc<CrossTabBroadcaster> {
        &self.broadcaster
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one memory check now.
    pub async fn check_memory(&self) -> crate::cache::MemoryReport {
        self.memory.check().await
    }

    pub async fn stats(&self) -> EngineStats {
        let (cache, usage, max_entries) = {
            let store = self.store.read().await;
            (store.stats(), store.usage(), store.max_entries())
        };
        EngineStats {
            hit_rate: cache.hit_rate(),
            cache,
            usage,
            max_entries,
            pressure: self.memory.pressure(),
            fetch: self.fetcher.stats(),
            in_flight: self.fetcher.in_flight_count(),
            poller: self.poller.state(),
            subscriptions: self.poller.subscription_count(),
            pending_optimistic: self.optimistic.pending_count(),
            origin: self.broadcaster.origin().to_string(),
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn validate(kind: &DataKind) -> Result<()> {
    match kind.validate() {
        Some(message) => Err(SyncError::InvalidRequest(message)),
        None => Ok(()),
    }
}

// == Remote Events ==
/// Applies sibling engines' events to the local cache.
fn spawn_remote_applier(
    mut messages: broadcast::Receiver<BroadcastMessage>,
    origin: String,
    store: Arc<RwLock<CacheStore>>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = match messages.recv().await {
                Ok(message) => message,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "remote event applier lagging");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if message.is_from(&origin) {
                continue;
            }
            if let Some(update) = apply_remote(&store, &message).await {
                bus.publish(update);
            }
        }
    })
}

async fn apply_remote(store: &RwLock<CacheStore>, message: &BroadcastMessage) -> Option<DataUpdate> {
    let kind = DataKind::new(message.field("kind")?);
    if kind.validate().is_some() {
        warn!(event_type = %message.event_type, "ignoring remote event with invalid kind");
        return None;
    }

    let mut store = store.write().await;
    if store.is_pinned(&kind) {
        debug!(%kind, event_type = %message.event_type, "optimistic update pending, ignoring remote event");
        return None;
    }

    let value = match message.event_type.as_str() {
        EVENT_DATA_COMMITTED => match message.payload.get("value") {
            Some(value) if !value.is_null() => {
                store.set(kind.clone(), value.clone());
                Some(value.clone())
            }
            _ => {
                store.invalidate(&kind)?;
                None
            }
        },
        EVENT_CACHE_INVALIDATED | EVENT_DATA_ROLLED_BACK => {
            store.invalidate(&kind)?;
            None
        }
        other => {
            debug!(event_type = other, "ignoring unknown remote event");
            return None;
        }
    };

    debug!(%kind, event_type = %message.event_type, "applied remote event");
    Some(DataUpdate {
        kind,
        value,
        error: None,
        origin: UpdateOrigin::Remote,
    })
}

/// Mirrors local optimistic outcomes to sibling engines.
fn spawn_outcome_relay(
    mut updates: broadcast::Receiver<DataUpdate>,
    broadcaster: Arc<CrossTabBroadcaster>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let update = match updates.recv().await {
                Ok(update) => update,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "outcome relay lagging");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let sent = match update.origin {
                UpdateOrigin::Committed => match &update.value {
                    Some(value) => broadcaster.broadcast(
                        EVENT_DATA_COMMITTED,
                        json!({ "kind": update.kind, "value": value }),
                    ),
                    // Nothing cached to mirror; siblings refetch instead.
                    None => broadcaster.broadcast(EVENT_CACHE_INVALIDATED, json!({ "kind": update.kind })),
                },
                UpdateOrigin::RolledBack => {
                    broadcaster.broadcast(EVENT_DATA_ROLLED_BACK, json!({ "kind": update.kind }))
                }
                _ => continue,
            };
            if let Err(e) = sent {
                warn!(kind = %update.kind, error = %e, "failed to mirror optimistic outcome");
            }
        }
    })
}
