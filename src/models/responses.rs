//! Response DTOs for the sync daemon API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::cache::{ErrorInfo, MemoryPressure};
use crate::engine::EngineStats;
use crate::kind::DataKind;
use crate::sync::{FetchOutcome, FetchSource, PollerState, Priority, Subscription};

/// Response body for GET /data/:kind
#[derive(Debug, Clone, Serialize)]
pub struct DataResponse {
    pub kind: DataKind,
    pub value: Value,
    /// Where the value came from (network, cache, stale fallback, ...)
    pub source: FetchSource,
    /// Latest refresh failure, when the value is a fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl From<FetchOutcome> for DataResponse {
    fn from(outcome: FetchOutcome) -> Self {
        Self {
            kind: outcome.kind,
            value: outcome.value,
            source: outcome.source,
            error: outcome.error,
        }
    }
}

/// Response body for DELETE /data/:kind
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    pub kind: DataKind,
    /// False when nothing was cached (siblings are still told)
    pub invalidated: bool,
}

impl InvalidateResponse {
    pub fn new(kind: DataKind, invalidated: bool) -> Self {
        Self {
            message: format!("Kind '{}' invalidated", kind),
            kind,
            invalidated,
        }
    }
}

/// Response body for POST /subscriptions
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub consumer_id: String,
    pub data_kinds: BTreeSet<DataKind>,
    pub priority: Priority,
    pub created_at: u64,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            consumer_id: subscription.consumer_id,
            data_kinds: subscription.data_kinds,
            priority: subscription.priority,
            created_at: subscription.created_at,
        }
    }
}

/// Response body for DELETE /subscriptions/:consumer_id
#[derive(Debug, Clone, Serialize)]
pub struct UnsubscribeResponse {
    /// Success message
    pub message: String,
    pub consumer_id: String,
    /// Poller state after the removal
    pub poller: PollerState,
}

impl UnsubscribeResponse {
    pub fn new(consumer_id: impl Into<String>, poller: PollerState) -> Self {
        let consumer_id = consumer_id.into();
        Self {
            message: format!("Consumer '{}' unsubscribed", consumer_id),
            consumer_id,
            poller,
        }
    }
}

/// Response body for POST /activity and PUT /visibility
#[derive(Debug, Clone, Serialize)]
pub struct ActivityResponse {
    pub visible: bool,
    /// Delay until the next poll given the new signals
    pub poll_interval_ms: u64,
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Values served after a failed refresh
    pub stale_served: u64,
    /// Number of evictions
    pub evictions: u64,
    pub invalidations: u64,
    /// Fetch results dropped in favour of newer data
    pub discarded_results: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    pub max_entries: usize,
    pub usage: f64,
    pub pressure: MemoryPressure,
    /// Network requests started
    pub fetch_requests: u64,
    /// Callers that joined an outstanding request
    pub joined_requests: u64,
    pub fetch_failures: u64,
    pub in_flight: usize,
    pub poller: PollerState,
    pub subscriptions: usize,
    pub pending_optimistic: usize,
    /// Origin id used on cross-tab events
    pub origin: String,
}

impl From<EngineStats> for StatsResponse {
    fn from(stats: EngineStats) -> Self {
        Self {
            hits: stats.cache.hits,
            misses: stats.cache.misses,
            hit_rate: stats.hit_rate,
            stale_served: stats.cache.stale_served,
            evictions: stats.cache.evictions,
            invalidations: stats.cache.invalidations,
            discarded_results: stats.cache.discarded_results,
            total_entries: stats.cache.total_entries,
            max_entries: stats.max_entries,
            usage: stats.usage,
            pressure: stats.pressure,
            fetch_requests: stats.fetch.requests,
            joined_requests: stats.fetch.joined,
            fetch_failures: stats.fetch.failures,
            in_flight: stats.in_flight,
            poller: stats.poller,
            subscriptions: stats.subscriptions,
            pending_optimistic: stats.pending_optimistic,
            origin: stats.origin,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
