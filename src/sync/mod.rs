//! Sync Module
//!
//! The deduplicated fetch path and the polling coordinator that drives it.
//!
//! # Components
//! - `Fetcher`: one outstanding request per data kind, results into the cache
//! - `PollingCoordinator`: subscriptions, adaptive interval, timer lifecycle
//! - `InFlightRegistry`: outstanding requests keyed by data kind
//! - `IntervalPolicy`: next delay from activity, visibility and error rate

pub mod activity;
pub mod fetcher;
pub mod inflight;
pub mod poller;
pub mod subscriptions;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use activity::{ActivityState, ErrorRateTracker, IntervalPolicy};
pub use fetcher::{FetchOutcome, FetchSource, FetchStats, Fetcher};
pub use inflight::InFlightRegistry;
pub use poller::{PollerState, PollingCoordinator, SubscriptionHandle, TickReport};
pub use subscriptions::{Priority, SubscribeOptions, Subscription};

// Registry locks guard plain bookkeeping; a panic elsewhere leaves it usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}
