//! Optimistic Update Engine
//!
//! Applies a speculative value to the cache before the real call returns,
//! then commits or rolls back. Operations get monotonic ids; only the newest
//! operation on a target may change the cache when it resolves.
//!
//! Every unresolved operation pins its kind in the store, which keeps fetch
//! results from overwriting the speculative value and keeps the memory
//! manager from evicting it.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::error::{Result, SyncError};
use crate::events::{DataUpdate, EventBus, SyncEvent, UpdateOrigin};
use crate::kind::DataKind;
use crate::optimistic::list;
use crate::optimistic::record::{OptimisticOutcome, OptimisticRecord, OptimisticState, Target};
use crate::sync::lock;

/// Resolved operations remembered for `state_of`
const HISTORY_LIMIT: usize = 128;

/// How a committed result lands in the cache.
#[derive(Debug, Clone, Copy)]
enum Commit {
    /// Server value replaces the kind's value and counts as a fetch
    Value,
    /// Server item replaces the item with the target's id
    Item,
    /// Nothing to write
    Nothing,
}

/// What a new operation makes visible.
struct Speculation {
    /// New value of the whole kind
    value: Value,
    /// Value or item tracked in the record
    speculative: Value,
    original: Option<Value>,
    position: Option<usize>,
}

#[derive(Debug, Default)]
struct Ledger {
    /// Newest unresolved operation per target
    records: HashMap<Target, OptimisticRecord>,
    /// Store pins held, by operation id
    pins: HashMap<u64, DataKind>,
    /// Pending delayed rollbacks, by operation id
    timers: HashMap<u64, JoinHandle<()>>,
    history: VecDeque<(u64, OptimisticState)>,
}

impl Ledger {
    fn release_pin(&mut self, store: &mut CacheStore, operation_id: u64) {
        if let Some(kind) = self.pins.remove(&operation_id) {
            store.unpin(&kind);
        }
    }

    fn finish(&mut self, operation_id: u64, state: OptimisticState) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back((operation_id, state));
    }
}

// == Optimistic Engine ==
#[derive(Debug)]
pub struct OptimisticEngine {
    store: Arc<RwLock<CacheStore>>,
    bus: EventBus,
    ledger: Mutex<Ledger>,
    next_id: AtomicU64,
    rollback_delay: Duration,
    weak_self: Weak<OptimisticEngine>,
}

impl OptimisticEngine {
    pub fn new(store: Arc<RwLock<CacheStore>>, bus: EventBus, rollback_delay: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            store,
            bus,
            ledger: Mutex::new(Ledger::default()),
            next_id: AtomicU64::new(0),
            rollback_delay,
            weak_self: weak_self.clone(),
        })
    }

    // == Update Value ==
    /// Replaces a kind's whole value until `operation` resolves.
    ///
    /// On success the returned value becomes the cached value. On failure
    /// the previous value comes back after the rollback delay.
    pub async fn update_value<F, E>(&self, kind: &DataKind, value: Value, operation: F) -> Result<OptimisticOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let target = Target::Kind { kind: kind.clone() };
        let operation_id = self
            .apply(&target, |current| {
                Ok(Speculation {
                    value: value.clone(),
                    speculative: value,
                    original: current.cloned(),
                    position: None,
                })
            })
            .await?;
        self.run(target, operation_id, Commit::Value, operation).await
    }

    // == Add Item ==
    /// Appends an item under a temporary `temp-<uuid>` id.
    ///
    /// The server's item replaces the temporary one on commit; `operation`
    /// receives the item as it was made visible.
    pub async fn add_item<F, Fut, E>(&self, kind: &DataKind, item: Value, operation: F) -> Result<OptimisticOutcome>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let id = list::temp_id();
        let item = list::with_id(item, &id);
        let target = Target::item(kind.clone(), id);
        let visible = item.clone();
        let operation_id = self
            .apply(&target, |current| {
                let mut items = list::to_list(kind, current)?;
                items.push(item.clone());
                Ok(Speculation {
                    value: Value::Array(items),
                    speculative: item,
                    original: None,
                    position: None,
                })
            })
            .await?;
        self.run(target, operation_id, Commit::Item, operation(visible)).await
    }

    // == Update Item ==
    /// Merges `patch` into the item with `id`.
    pub async fn update_item<F, E>(
        &self,
        kind: &DataKind,
        id: &str,
        patch: Value,
        operation: F,
    ) -> Result<OptimisticOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let target = Target::item(kind.clone(), id);
        let operation_id = self
            .apply(&target, |current| {
                let mut items = list::to_list(kind, current)?;
                let index = list::position(&items, id)
                    .ok_or_else(|| SyncError::NotFound(format!("{kind}#{id}")))?;
                let original = items[index].clone();
                let updated = list::merge(&original, &patch);
                items[index] = updated.clone();
                Ok(Speculation {
                    value: Value::Array(items),
                    speculative: updated,
                    original: Some(original),
                    position: Some(index),
                })
            })
            .await?;
        self.run(target, operation_id, Commit::Item, operation).await
    }

    // == Remove Item ==
    /// Removes the item with `id`; a rollback puts it back at its index.
    pub async fn remove_item<F, E>(&self, kind: &DataKind, id: &str, operation: F) -> Result<OptimisticOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let target = Target::item(kind.clone(), id);
        let operation_id = self
            .apply(&target, |current| {
                let mut items = list::to_list(kind, current)?;
                let index = list::position(&items, id)
                    .ok_or_else(|| SyncError::NotFound(format!("{kind}#{id}")))?;
                let original = items.remove(index);
                Ok(Speculation {
                    value: Value::Array(items),
                    speculative: Value::Null,
                    original: Some(original),
                    position: Some(index),
                })
            })
            .await?;
        self.run(target, operation_id, Commit::Nothing, operation).await
    }

    // == Apply ==
    async fn apply<S>(&self, target: &Target, speculate: S) -> Result<u64>
    where
        S: FnOnce(Option<&Value>) -> Result<Speculation>,
    {
        let kind = target.data_kind().clone();
        let (operation_id, value) = {
            let mut store = self.store.write().await;
            let speculation = speculate(store.get(&kind).map(|entry| &entry.value))?;
            let mut ledger = lock(&self.ledger);
            let operation_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

            let (original, position) = match ledger.records.remove(target) {
                Some(previous) => {
                    if let Some(timer) = ledger.timers.remove(&previous.operation_id) {
                        timer.abort();
                        ledger.release_pin(&mut store, previous.operation_id);
                        debug!(%target, previous = previous.operation_id, operation_id, "cancelled pending rollback");
                    }
                    (previous.original, previous.position)
                }
                None => (speculation.original, speculation.position),
            };

            store.write_speculative(&kind, speculation.value.clone());
            store.pin(&kind);
            ledger.pins.insert(operation_id, kind.clone());
            ledger.records.insert(
                target.clone(),
                OptimisticRecord {
                    operation_id,
                    target: target.clone(),
                    speculative: speculation.speculative,
                    original,
                    position,
                    state: OptimisticState::Applied,
                    created_at: store.now(),
                },
            );
            debug!(%target, operation_id, "speculative value applied");
            (operation_id, speculation.value)
        };

        self.bus.publish(DataUpdate {
            kind,
            value: Some(value),
            error: None,
            origin: UpdateOrigin::Optimistic,
        });
        Ok(operation_id)
    }

    // == Run ==
    async fn run<F, E>(&self, target: Target, operation_id: u64, commit: Commit, operation: F) -> Result<OptimisticOutcome>
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        self.set_state(&target, operation_id, OptimisticState::Committing);
        let result = operation.await.map_err(|e| e.to_string());
        self.resolve(target, operation_id, commit, result).await
    }

    fn set_state(&self, target: &Target, operation_id: u64, state: OptimisticState) {
        let mut ledger = lock(&self.ledger);
        if let Some(record) = ledger.records.get_mut(target) {
            if record.operation_id == operation_id {
                record.state = state;
            }
        }
    }

    // == Resolve ==
    async fn resolve(
        &self,
        target: Target,
        operation_id: u64,
        commit: Commit,
        result: std::result::Result<Value, String>,
    ) -> Result<OptimisticOutcome> {
        let kind = target.data_kind().clone();
        let mut store = self.store.write().await;
        let mut ledger = lock(&self.ledger);

        let current = ledger
            .records
            .get(&target)
            .is_some_and(|record| record.operation_id == operation_id);

        if !current {
            ledger.release_pin(&mut store, operation_id);
            drop(ledger);
            drop(store);
            debug!(%target, operation_id, "superseded operation resolved, ignoring");
            self.bus.emit(SyncEvent::OperationSuperseded {
                target: target.to_string(),
                operation_id,
            });
            return match result {
                Ok(value) => Ok(OptimisticOutcome {
                    operation_id,
                    target,
                    value,
                    superseded: true,
                }),
                Err(cause) => Err(failure(operation_id, &target, cause)),
            };
        }

        match result {
            Ok(value) => {
                ledger.records.remove(&target);
                ledger.release_pin(&mut store, operation_id);
                ledger.finish(operation_id, OptimisticState::Committed);
                drop(ledger);

                write_commit(&mut store, &target, commit, &value);
                let visible = store.get(&kind).map(|entry| entry.value.clone());
                drop(store);

                info!(%target, operation_id, "optimistic update committed");
                self.bus.publish(DataUpdate {
                    kind,
                    value: visible,
                    error: None,
                    origin: UpdateOrigin::Committed,
                });
                Ok(OptimisticOutcome {
                    operation_id,
                    target,
                    value,
                    superseded: false,
                })
            }
            Err(cause) => {
                warn!(%target, operation_id, %cause, "optimistic update failed, rolling back");
                if let Some(record) = ledger.records.get_mut(&target) {
                    record.state = OptimisticState::RollingBack;
                }

                if self.rollback_delay.is_zero() {
                    let update = roll_back(&mut store, &mut ledger, &target);
                    drop(ledger);
                    drop(store);
                    if let Some(update) = update {
                        self.bus.publish(update);
                    }
                } else {
                    let timer = self.schedule_rollback(target.clone(), operation_id);
                    ledger.timers.insert(operation_id, timer);
                }
                Err(failure(operation_id, &target, cause))
            }
        }
    }

    fn schedule_rollback(&self, target: Target, operation_id: u64) -> JoinHandle<()> {
        let engine = self.weak_self.clone();
        let delay = self.rollback_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                engine.rollback_inner(&target, operation_id, false).await;
            }
        })
    }

    // == Rollback ==
    /// Restores the value from before `operation_id` right away.
    ///
    /// Cancels a pending delayed rollback. Returns false, changing nothing,
    /// when the operation is not the newest unresolved one on `target`
    /// (already rolled back, committed or superseded).
    pub async fn rollback(&self, target: &Target, operation_id: u64) -> bool {
        self.rollback_inner(target, operation_id, true).await
    }

    async fn rollback_inner(&self, target: &Target, operation_id: u64, abort_timer: bool) -> bool {
        let update = {
            let mut store = self.store.write().await;
            let mut ledger = lock(&self.ledger);

            let current = ledger
                .records
                .get(target)
                .is_some_and(|record| record.operation_id == operation_id);
            if !current {
                debug!(%target, operation_id, "rollback is a no-op");
                return false;
            }
            if let Some(timer) = ledger.timers.remove(&operation_id) {
                if abort_timer {
                    timer.abort();
                }
            }
            roll_back(&mut store, &mut ledger, target)
        };

        if let Some(update) = update {
            self.bus.publish(update);
        }
        true
    }

    // == Introspection ==
    /// The newest unresolved operation on `target`.
    pub fn record(&self, target: &Target) -> Option<OptimisticRecord> {
        lock(&self.ledger).records.get(target).cloned()
    }

    /// State of an operation: live while unresolved, from recent history
    /// once committed or rolled back. None for superseded or unknown ids.
    pub fn state_of(&self, operation_id: u64) -> Option<OptimisticState> {
        let ledger = lock(&self.ledger);
        ledger
            .records
            .values()
            .find(|record| record.operation_id == operation_id)
            .map(|record| record.state)
            .or_else(|| {
                ledger
                    .history
                    .iter()
                    .rev()
                    .find(|(id, _)| *id == operation_id)
                    .map(|(_, state)| *state)
            })
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.ledger).records.len()
    }

    /// Aborts pending delayed rollbacks.
    pub fn shutdown(&self) {
        let mut ledger = lock(&self.ledger);
        for (_, timer) in ledger.timers.drain() {
            timer.abort();
        }
    }
}

fn failure(operation_id: u64, target: &Target, cause: String) -> SyncError {
    SyncError::OptimisticUpdateFailure {
        operation_id,
        target: target.to_string(),
        cause,
    }
}

fn write_commit(store: &mut CacheStore, target: &Target, commit: Commit, value: &Value) {
    let kind = target.data_kind();
    match (commit, target.item_id()) {
        (Commit::Value, _) => store.set(kind.clone(), value.clone()),
        (Commit::Item, Some(id)) if value.is_object() => {
            let Some(Value::Array(items)) = store.get(kind).map(|entry| entry.value.clone()) else {
                return;
            };
            let mut items = items;
            if list::replace(&mut items, id, value.clone()) {
                store.write_speculative(kind, Value::Array(items));
            }
        }
        _ => {}
    }
}

/// Restores the record's original and releases its pin. Caller holds both locks.
fn roll_back(store: &mut CacheStore, ledger: &mut Ledger, target: &Target) -> Option<DataUpdate> {
    let record = ledger.records.remove(target)?;
    let kind = target.data_kind();

    match target.item_id() {
        None => store.restore(kind, record.original),
        Some(id) => {
            let current = store
                .get(kind)
                .map(|entry| (entry.value.clone(), entry.speculative, entry.pinned));
            // An absent entry stays absent; the next fetch brings the real list.
            if let Some((Value::Array(mut items), speculative, pinned)) = current {
                list::restore(&mut items, id, record.original, record.position);
                if speculative && pinned <= 1 && items.is_empty() {
                    store.restore(kind, None);
                } else {
                    store.write_speculative(kind, Value::Array(items));
                }
            }
        }
    }

    ledger.release_pin(store, record.operation_id);
    ledger.finish(record.operation_id, OptimisticState::RolledBack);
    info!(%target, operation_id = record.operation_id, "optimistic update rolled back");

    Some(DataUpdate {
        kind: kind.clone(),
        value: store.get(kind).map(|entry| entry.value.clone()),
        error: None,
        origin: UpdateOrigin::RolledBack,
    })
}
