//! Polling Coordinator
//!
//! Keeps every subscribed data kind fresh with a single timer. Idle while
//! nobody is subscribed, active otherwise. Each tick fetches only the kinds
//! whose TTL has run out, and the delay until the next tick adapts to user
//! activity, visibility and the recent error rate.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::error::{Result, SyncError};
use crate::events::DataUpdate;
use crate::kind::DataKind;
use crate::sync::activity::{ActivityState, IntervalPolicy};
use crate::sync::fetcher::Fetcher;
use crate::sync::subscriptions::{Priority, SubscribeOptions, SubscribeOutcome, Subscription, SubscriptionRegistry};
use crate::sync::{lock, read_lock, write_lock};
use crate::tasks::spawn_poll_task;

// == Poller State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// No subscriptions, no timer
    Idle,
    /// Timer running
    Active,
}

// == Tick Report ==
/// What one polling pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Size of the needed set
    pub needed: usize,
    /// Kinds skipped because they were still fresh
    pub skipped: usize,
    /// Kinds refreshed successfully
    pub fetched: Vec<DataKind>,
    /// Kinds whose refresh failed (possibly served stale)
    pub failed: Vec<DataKind>,
}

// == Polling Coordinator ==
pub struct PollingCoordinator {
    fetcher: Fetcher,
    subscriptions: RwLock<SubscriptionRegistry>,
    policy: IntervalPolicy,
    activity: Mutex<ActivityState>,
    timer: Mutex<Option<JoinHandle<()>>>,
    wake: Arc<Notify>,
    slow_fetch_warn_ms: u64,
}

impl PollingCoordinator {
    pub fn new(fetcher: Fetcher, config: PollingConfig, slow_fetch_warn_ms: u64) -> Arc<Self> {
        let now = fetcher.clock().now_ms();
        Arc::new(Self {
            fetcher,
            subscriptions: RwLock::new(SubscriptionRegistry::new()),
            policy: IntervalPolicy::new(config),
            activity: Mutex::new(ActivityState::new(now)),
            timer: Mutex::new(None),
            wake: Arc::new(Notify::new()),
            slow_fetch_warn_ms,
        })
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn state(&self) -> PollerState {
        match lock(&self.timer).as_ref() {
            Some(handle) if !handle.is_finished() => PollerState::Active,
            _ => PollerState::Idle,
        }
    }

    // == Subscribe ==
    /// Registers a consumer and returns its handle.
    ///
    /// Kinds of a new (or changed) subscription that are not fresh are
    /// fetched right away instead of waiting for the next tick.
    pub async fn subscribe(
        self: &Arc<Self>,
        consumer_id: &str,
        data_kinds: impl IntoIterator<Item = DataKind>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle> {
        if consumer_id.is_empty() {
            return Err(SyncError::InvalidRequest("Consumer id cannot be empty".to_string()));
        }
        let kinds: BTreeSet<DataKind> = data_kinds.into_iter().collect();
        if kinds.is_empty() {
            return Err(SyncError::InvalidRequest(
                "Subscription needs at least one data kind".to_string(),
            ));
        }
        if let Some(message) = kinds.iter().find_map(DataKind::validate) {
            return Err(SyncError::InvalidRequest(message));
        }

        // Receiver first so the immediate fetch cannot be missed.
        let updates = self.fetcher.bus().subscribe_updates();
        let now = self.fetcher.clock().now_ms();
        let outcome = write_lock(&self.subscriptions).subscribe(consumer_id, kinds.clone(), options, now);

        match outcome {
            SubscribeOutcome::Unchanged => {
                debug!(consumer_id, "duplicate subscription ignored");
            }
            SubscribeOutcome::Created | SubscribeOutcome::Replaced => {
                info!(
                    consumer_id,
                    kinds = kinds.len(),
                    replaced = outcome == SubscribeOutcome::Replaced,
                    "consumer subscribed"
                );
                self.fetch_stale(&kinds).await;
            }
        }

        self.ensure_running();

        Ok(SubscriptionHandle {
            consumer_id: consumer_id.to_string(),
            kinds,
            updates,
            coordinator: Arc::downgrade(self),
        })
    }

    // == Unsubscribe ==
    /// Removes a consumer. The poller goes idle with the last one.
    ///
    /// Fetches the consumer started keep running and still fill the cache.
    pub fn unsubscribe(&self, consumer_id: &str) -> bool {
        let removed = write_lock(&self.subscriptions).unsubscribe(consumer_id).is_some();

        if removed {
            info!(consumer_id, "consumer unsubscribed");
            self.stop_if_idle();
        }
        removed
    }

    pub fn subscription(&self, consumer_id: &str) -> Option<Subscription> {
        read_lock(&self.subscriptions).get(consumer_id).cloned()
    }

    pub fn subscription_count(&self) -> usize {
        read_lock(&self.subscriptions).len()
    }

    /// Union of subscribed kinds, highest priority first.
    pub fn needed_kinds(&self) -> Vec<(DataKind, Priority)> {
        read_lock(&self.subscriptions).needed_kinds()
    }

    // == Tick ==
    /// One polling pass over the needed set.
    pub async fn tick(&self) -> TickReport {
        let needed = self.needed_kinds();
        if needed.is_empty() {
            return TickReport::default();
        }

        self.fetcher.warn_slow_requests(self.slow_fetch_warn_ms);

        let stale = self.stale_kinds(needed.iter().map(|(kind, _)| kind)).await;
        let mut report = TickReport {
            needed: needed.len(),
            skipped: needed.len() - stale.len(),
            ..TickReport::default()
        };

        let fetches = stale.iter().map(|kind| self.fetcher.fetch_data_kind(kind));
        let results = futures::future::join_all(fetches).await;

        for (kind, result) in stale.into_iter().zip(results) {
            match result {
                Ok(outcome) if outcome.error.is_none() => report.fetched.push(kind),
                _ => report.failed.push(kind),
            }
        }

        debug!(
            needed = report.needed,
            skipped = report.skipped,
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            "poll tick complete"
        );
        report
    }

    async fn stale_kinds<'a>(&self, kinds: impl Iterator<Item = &'a DataKind>) -> Vec<DataKind> {
        let store = self.fetcher.store().read().await;
        let registry = self.fetcher.kinds();
        kinds
            .filter(|kind| !store.is_valid(kind, registry.get(kind).ttl_ms))
            .cloned()
            .collect()
    }

    async fn fetch_stale(&self, kinds: &BTreeSet<DataKind>) {
        for kind in self.stale_kinds(kinds.iter()).await {
            debug!(%kind, "fetching for new subscriber");
            self.fetcher.prefetch(&kind);
        }
    }

    // == Interval ==
    /// Delay until the next tick, from the current signals.
    pub fn next_interval(&self) -> Duration {
        let now = self.fetcher.clock().now_ms();
        let activity = *lock(&self.activity);
        self.policy
            .next_interval(now, &activity, &self.fetcher.error_tracker())
    }

    /// Reports a pointer, keyboard, scroll or touch interaction.
    pub fn record_interaction(&self) {
        let now = self.fetcher.clock().now_ms();
        let was_active = {
            let mut activity = lock(&self.activity);
            let was_active = activity.is_active(now, self.policy.config().inactivity_threshold_ms);
            activity.last_interaction_ms = now;
            was_active
        };
        if !was_active {
            debug!("user active again, waking poller");
            self.wake.notify_one();
        }
    }

    /// Reports a visibility change of the consumer surface.
    pub fn set_visibility(&self, visible: bool) {
        let was_visible = std::mem::replace(&mut lock(&self.activity).visible, visible);
        if visible && !was_visible {
            debug!("became visible, waking poller");
            self.wake.notify_one();
        }
    }

    pub fn activity(&self) -> ActivityState {
        *lock(&self.activity)
    }

    // == Lifecycle ==
    // Both timer transitions hold the timer lock while reading the registry,
    // so the last one to run sees the final subscription set.
    fn ensure_running(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        let running = timer.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        if running || read_lock(&self.subscriptions).is_empty() {
            return;
        }
        *timer = Some(spawn_poll_task(Arc::downgrade(self), self.wake.clone()));
        info!("poller active");
    }

    fn stop_if_idle(&self) {
        let mut timer = lock(&self.timer);
        if !read_lock(&self.subscriptions).is_empty() {
            return;
        }
        if let Some(handle) = timer.take() {
            handle.abort();
            info!("poller idle");
        }
    }

    fn stop(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
            info!("poller idle");
        }
    }

    /// Stops the timer and drops every subscription.
    pub fn shutdown(&self) {
        let dropped = {
            let mut registry = write_lock(&self.subscriptions);
            let count = registry.len();
            *registry = SubscriptionRegistry::new();
            count
        };
        if dropped > 0 {
            warn!(dropped, "shutting down with active subscriptions");
        }
        self.stop();
    }
}

impl Drop for PollingCoordinator {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

// == Subscription Handle ==
/// A mounted consumer's view of the engine.
pub struct SubscriptionHandle {
    consumer_id: String,
    kinds: BTreeSet<DataKind>,
    updates: broadcast::Receiver<DataUpdate>,
    coordinator: Weak<PollingCoordinator>,
}

impl SubscriptionHandle {
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn kinds(&self) -> &BTreeSet<DataKind> {
        &self.kinds
    }

    /// Waits for the next update to one of this consumer's kinds.
    ///
    /// Returns None once the engine is gone.
    pub async fn next_update(&mut self) -> Option<DataUpdate> {
        loop {
            match self.updates.recv().await {
                Ok(update) if self.kinds.contains(&update.kind) => return Some(update),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(consumer_id = %self.consumer_id, missed, "consumer lagging behind updates");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already-delivered update without waiting.
    pub fn try_next_update(&mut self) -> Option<DataUpdate> {
        loop {
            match self.updates.try_recv() {
                Ok(update) if self.kinds.contains(&update.kind) => return Some(update),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Removes the subscription. Safe to call while its fetches are pending.
    pub fn unsubscribe(self) -> bool {
        self.coordinator
            .upgrade()
            .map(|coordinator| coordinator.unsubscribe(&self.consumer_id))
            .unwrap_or(false)
    }
}
