//! API Handlers
//!
//! HTTP request handlers for each sync daemon endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    Json,
};

use crate::broadcast::{MemoryStorage, SharedStorage};
use crate::client::HttpRequestClient;
use crate::config::Config;
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::kind::DataKind;
use crate::models::{
    ActivityResponse, DataResponse, HealthResponse, InvalidateResponse, StatsResponse,
    SubscribeRequest, SubscriptionResponse, UnsubscribeResponse, VisibilityRequest,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    /// Creates a new AppState around an engine.
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// The storage is a fresh `MemoryStorage`, so cross-tab events only
    /// reach engines built on that same storage inside this process. A
    /// standalone daemon therefore has no siblings; use `with_storage` to
    /// share a channel.
    pub fn from_config(config: Config) -> Result<Self> {
        Self::with_storage(config, Arc::new(MemoryStorage::new()))
    }

    /// Creates a new AppState that talks to `api_base_url` over HTTP and
    /// mirrors events through the given storage.
    pub fn with_storage(config: Config, storage: Arc<dyn SharedStorage>) -> Result<Self> {
        let client = Arc::new(HttpRequestClient::new(&config.api_base_url)?);
        Ok(Self::new(SyncEngine::new(config, client, storage)))
    }
}

/// Folds the query string into the kind: `/data/appointments?date=x`
/// becomes `appointments?date=x`.
fn data_kind(kind: String, query: Option<String>) -> DataKind {
    match query.filter(|q| !q.is_empty()) {
        Some(query) => DataKind::new(format!("{kind}?{query}")),
        None => DataKind::new(kind),
    }
}

/// Handler for GET /data/:kind
///
/// Stale-while-revalidate read; blocks on the network only when nothing
/// usable is cached.
pub async fn get_data_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<DataResponse>> {
    let kind = data_kind(kind, query);
    let outcome = state.engine.load(&kind).await?;
    Ok(Json(DataResponse::from(outcome)))
}

/// Handler for DELETE /data/:kind
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<InvalidateResponse>> {
    let kind = data_kind(kind, query);
    let invalidated = state.engine.invalidate(&kind).await?;
    Ok(Json(InvalidateResponse::new(kind, invalidated)))
}

/// Handler for POST /subscriptions
///
/// Registers (or replaces) a consumer. Its stale kinds start loading
/// before the response is sent.
pub async fn subscribe_handler(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>)> {
    if let Some(error_msg) = req.validate() {
        return Err(SyncError::InvalidRequest(error_msg));
    }

    // The subscription outlives the handle; it ends with DELETE.
    let handle = state
        .engine
        .subscribe(&req.consumer_id, req.data_kinds.clone(), req.options())
        .await?;
    drop(handle);

    let subscription = state
        .engine
        .poller()
        .subscription(&req.consumer_id)
        .ok_or_else(|| SyncError::Internal("subscription vanished".to_string()))?;
    Ok((StatusCode::CREATED, Json(SubscriptionResponse::from(subscription))))
}

/// Handler for DELETE /subscriptions/:consumer_id
pub async fn unsubscribe_handler(
    State(state): State<AppState>,
    Path(consumer_id): Path<String>,
) -> Result<Json<UnsubscribeResponse>> {
    if !state.engine.unsubscribe(&consumer_id) {
        return Err(SyncError::NotFound(format!("consumer '{}'", consumer_id)));
    }
    let poller = state.engine.poller().state();
    Ok(Json(UnsubscribeResponse::new(consumer_id, poller)))
}

/// Handler for POST /activity
///
/// Reports a user interaction.
pub async fn activity_handler(State(state): State<AppState>) -> Json<ActivityResponse> {
    state.engine.record_interaction();
    Json(activity(&state))
}

/// Handler for PUT /visibility
pub async fn visibility_handler(
    State(state): State<AppState>,
    Json(req): Json<VisibilityRequest>,
) -> Json<ActivityResponse> {
    state.engine.set_visibility(req.visible);
    Json(activity(&state))
}

fn activity(state: &AppState) -> ActivityResponse {
    let poller = state.engine.poller();
    ActivityResponse {
        visible: poller.activity().visible,
        poll_interval_ms: poller.next_interval().as_millis() as u64,
    }
}

/// Handler for GET /stats
///
/// Returns current engine statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.engine.stats().await))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
