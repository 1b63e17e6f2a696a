//! Deduplicated Fetch Path
//!
//! Every network request for a data kind goes through here. Concurrent
//! callers for the same kind share one request; results land in the cache
//! store and are pushed to consumers. When a refresh fails and something is
//! cached, callers get the cached value with the failure attached instead
//! of an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::cache::{CacheStore, ErrorInfo, Freshness, SchemaRegistry};
use crate::client::RequestClient;
use crate::clock::SharedClock;
use crate::config::KindRegistry;
use crate::error::{FetchError, Result, SyncError};
use crate::events::{DataUpdate, EventBus, SyncEvent, UpdateOrigin};
use crate::kind::DataKind;
use crate::sync::activity::ErrorRateTracker;
use crate::sync::inflight::{InFlightRegistry, InFlightRequest, SharedFetch};
use crate::sync::lock;

// == Fetch Outcome ==
/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    /// This call started the network request
    Network,
    /// This call joined a request that was already in flight
    Joined,
    /// Served from cache inside the freshness window
    Cache,
    /// Served from cache past the TTL while a refresh runs
    Revalidating,
    /// The refresh failed; the last good value was served
    StaleFallback,
}

/// Value returned to a caller of the fetch path.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub kind: DataKind,
    pub value: Value,
    /// Latest refresh failure, when the value is a fallback
    pub error: Option<ErrorInfo>,
    pub source: FetchSource,
}

// == Fetch Stats ==
#[derive(Debug, Default)]
struct FetchCounters {
    requests: AtomicU64,
    joined: AtomicU64,
    failures: AtomicU64,
    superseded: AtomicU64,
}

/// Counters of the fetch path.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FetchStats {
    /// Network requests started
    pub requests: u64,
    /// Callers that joined an outstanding request
    pub joined: u64,
    /// Requests that failed
    pub failures: u64,
    /// Results dropped because a newer request had started
    pub superseded: u64,
}

// == Fetcher ==
/// Deduplicating front of the request client.
/// Clone is cheap; all clones share one registry and one store.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    client: Arc<dyn RequestClient>,
    store: Arc<RwLock<CacheStore>>,
    kinds: Arc<KindRegistry>,
    schemas: SchemaRegistry,
    inflight: Mutex<InFlightRegistry>,
    errors: Mutex<ErrorRateTracker>,
    counters: FetchCounters,
    bus: EventBus,
    clock: SharedClock,
    overflow: Arc<Notify>,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn RequestClient>,
        store: Arc<RwLock<CacheStore>>,
        kinds: Arc<KindRegistry>,
        schemas: SchemaRegistry,
        bus: EventBus,
        clock: SharedClock,
        error_window: usize,
    ) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                client,
                store,
                kinds,
                schemas,
                inflight: Mutex::new(InFlightRegistry::new()),
                errors: Mutex::new(ErrorRateTracker::new(error_window)),
                counters: FetchCounters::default(),
                bus,
                clock,
                overflow: Arc::new(Notify::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<RwLock<CacheStore>> {
        &self.inner.store
    }

    pub fn kinds(&self) -> &Arc<KindRegistry> {
        &self.inner.kinds
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    /// Notified whenever a fetch leaves the store above capacity.
    pub fn overflow_signal(&self) -> Arc<Notify> {
        self.inner.overflow.clone()
    }

    // == Fetch ==
    /// Fetches a kind, joining an outstanding request when there is one.
    ///
    /// All callers that overlap with one outstanding request observe the
    /// same network result.
    pub async fn fetch_data_kind(&self, key: &DataKind) -> Result<FetchOutcome> {
        let (future, joined) = self.request(key, false);
        let result = future.await;
        self.resolve(key, result, joined).await
    }

    /// Starts a new request even if one is outstanding.
    ///
    /// The outstanding request keeps running but its result is discarded.
    pub async fn refresh(&self, key: &DataKind) -> Result<FetchOutcome> {
        let (future, _) = self.request(key, true);
        let result = future.await;
        self.resolve(key, result, false).await
    }

    /// Starts (or joins) a request without waiting for it.
    pub fn prefetch(&self, key: &DataKind) {
        let _ = self.request(key, false);
    }

    // == Load ==
    /// Stale-while-revalidate read.
    ///
    /// Fresh values are returned as is. Stale values are returned at once
    /// while a background refresh starts. Expired or missing values block
    /// on a fetch.
    pub async fn load(&self, key: &DataKind) -> Result<FetchOutcome> {
        let config = *self.inner.kinds.get(key);
        let cached = {
            let mut store = self.inner.store.write().await;
            match store.freshness(key, &config) {
                Some(freshness @ (Freshness::Fresh | Freshness::Stale)) => {
                    store.read(key).map(|entry| (freshness, entry))
                }
                _ => None,
            }
        };

        match cached {
            Some((Freshness::Fresh, entry)) => Ok(FetchOutcome {
                kind: key.clone(),
                value: entry.value,
                error: entry.last_error,
                source: FetchSource::Cache,
            }),
            Some((_, entry)) => {
                debug!(kind = %key, "serving stale value while revalidating");
                self.prefetch(key);
                Ok(FetchOutcome {
                    kind: key.clone(),
                    value: entry.value,
                    error: entry.last_error,
                    source: FetchSource::Revalidating,
                })
            }
            None => self.fetch_data_kind(key).await,
        }
    }

    // == Request ==
    fn request(&self, key: &DataKind, force: bool) -> (SharedFetch, bool) {
        let mut inflight = lock(&self.inner.inflight);

        if !force {
            if let Some(pending) = inflight.join(key) {
                self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %key, "joining in-flight request");
                return (pending, true);
            }
        }

        let token = inflight.next_token();
        let started_at = self.inner.clock.now_ms();

        let fetcher = self.clone();
        let kind = key.clone();
        let handle = tokio::spawn(async move { fetcher.run_request(kind, token).await });

        let kind = key.clone();
        let future: SharedFetch = handle
            .map(move |joined| {
                joined.unwrap_or_else(|e| Err(FetchError::new(kind, format!("fetch task failed: {e}"))))
            })
            .boxed()
            .shared();

        let request = InFlightRequest {
            token,
            started_at,
            future: future.clone(),
        };
        if let Some(superseded) = inflight.register(key.clone(), request) {
            debug!(kind = %key, superseded, token, "superseding in-flight request");
        }
        self.inner.counters.requests.fetch_add(1, Ordering::Relaxed);

        (future, false)
    }

    async fn run_request(&self, kind: DataKind, token: u64) -> std::result::Result<Value, FetchError> {
        let result = match self.inner.client.fetch(&kind).await {
            Ok(value) => self.inner.schemas.validate(&kind, &value).map(|_| value),
            Err(e) => Err(e),
        };
        self.complete(&kind, token, &result).await;
        result
    }

    // == Complete ==
    async fn complete(&self, kind: &DataKind, token: u64, result: &std::result::Result<Value, FetchError>) {
        let mut store = self.inner.store.write().await;
        let current = lock(&self.inner.inflight).complete(kind, token);
        lock(&self.inner.errors).record(result.is_ok());

        if !current {
            store.record_discarded();
            self.inner.counters.superseded.fetch_add(1, Ordering::Relaxed);
            debug!(%kind, token, "discarding result of superseded request");
            self.inner.bus.emit(SyncEvent::DeduplicationRace {
                kind: kind.clone(),
                token,
            });
            return;
        }

        match result {
            Ok(value) => {
                if store.is_pinned(kind) {
                    store.record_discarded();
                    debug!(%kind, "optimistic update pending, keeping speculative value");
                    return;
                }
                store.set(kind.clone(), value.clone());
                let over_capacity = store.len() > store.max_entries();
                drop(store);

                if over_capacity {
                    self.inner.overflow.notify_one();
                }
                self.inner.bus.publish(DataUpdate {
                    kind: kind.clone(),
                    value: Some(value.clone()),
                    error: None,
                    origin: UpdateOrigin::Fetch,
                });
            }
            Err(err) => {
                self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
                let update = match store.record_error(kind, err.cause.clone()) {
                    Some(info) => {
                        warn!(
                            %kind,
                            failures = info.consecutive_failures,
                            cause = %err.cause,
                            "refresh failed, keeping last good value"
                        );
                        DataUpdate {
                            kind: kind.clone(),
                            value: store.get(kind).map(|entry| entry.value.clone()),
                            error: Some(info),
                            origin: UpdateOrigin::Fetch,
                        }
                    }
                    None => {
                        warn!(%kind, cause = %err.cause, "fetch failed with nothing cached");
                        DataUpdate {
                            kind: kind.clone(),
                            value: None,
                            error: Some(ErrorInfo {
                                message: err.cause.clone(),
                                occurred_at: store.now(),
                                consecutive_failures: 1,
                            }),
                            origin: UpdateOrigin::Fetch,
                        }
                    }
                };
                drop(store);
                self.inner.bus.publish(update);
            }
        }
    }

    // == Resolve ==
    async fn resolve(
        &self,
        key: &DataKind,
        result: std::result::Result<Value, FetchError>,
        joined: bool,
    ) -> Result<FetchOutcome> {
        match result {
            Ok(value) => Ok(FetchOutcome {
                kind: key.clone(),
                value,
                error: None,
                source: if joined {
                    FetchSource::Joined
                } else {
                    FetchSource::Network
                },
            }),
            Err(err) => {
                let mut store = self.inner.store.write().await;
                let fallback = store
                    .get(key)
                    .map(|entry| (entry.value.clone(), entry.last_error.clone()));
                match fallback {
                    Some((value, error)) => {
                        store.record_stale_served();
                        Ok(FetchOutcome {
                            kind: key.clone(),
                            value,
                            error,
                            source: FetchSource::StaleFallback,
                        })
                    }
                    None => Err(SyncError::Fetch(err)),
                }
            }
        }
    }

    // == Introspection ==
    /// Whether a request for `key` is outstanding.
    pub fn is_in_flight(&self, key: &DataKind) -> bool {
        lock(&self.inner.inflight).contains(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.inner.inflight).len()
    }

    /// Logs requests outstanding for longer than `threshold_ms`.
    pub fn warn_slow_requests(&self, threshold_ms: u64) -> usize {
        let now = self.inner.clock.now_ms();
        let slow = lock(&self.inner.inflight).older_than(now.saturating_sub(threshold_ms));
        for (kind, started_at) in &slow {
            warn!(%kind, elapsed_ms = now.saturating_sub(*started_at), "fetch is taking long");
        }
        slow.len()
    }

    /// Copy of the recent outcome window.
    pub fn error_tracker(&self) -> ErrorRateTracker {
        lock(&self.inner.errors).clone()
    }

    pub fn stats(&self) -> FetchStats {
        let c = &self.inner.counters;
        FetchStats {
            requests: c.requests.load(Ordering::Relaxed),
            joined: c.joined.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            superseded: c.superseded.load(Ordering::Relaxed),
        }
    }
}
