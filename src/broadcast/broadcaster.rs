//! Cross-Tab Broadcaster
//!
//! Mirrors events to sibling engines through shared storage. Each event is
//! written under `sync_<event_type>` as JSON `{ ...payload, timestamp,
//! source }` and removed again after a short delay. A listener turns other
//! engines' writes back into local messages.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::broadcast::storage::{SharedStorage, StorageChange};
use crate::clock::SharedClock;
use crate::error::{Result, SyncError};
use crate::sync::lock;

/// Namespace of broadcast keys in shared storage
pub const KEY_PREFIX: &str = "sync_";

/// Buffered messages per local subscriber
const MESSAGE_CHANNEL_CAPACITY: usize = 256;

// == Broadcast Message ==
/// An event delivered to local subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastMessage {
    pub event_type: String,
    /// Payload fields plus `timestamp` and `source`
    pub payload: Value,
    /// Origin id of the sending engine
    pub source: String,
    pub timestamp: u64,
}

impl BroadcastMessage {
    pub fn is_from(&self, origin: &str) -> bool {
        self.source == origin
    }

    /// Reads a string field of the payload.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }
}

// == Cross-Tab Broadcaster ==
pub struct CrossTabBroadcaster {
    origin: String,
    storage: Arc<dyn SharedStorage>,
    clock: SharedClock,
    cleanup_delay: Duration,
    local: broadcast::Sender<BroadcastMessage>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl CrossTabBroadcaster {
    pub fn new(storage: Arc<dyn SharedStorage>, clock: SharedClock, cleanup_delay: Duration) -> Self {
        let (local, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            origin: Uuid::new_v4().to_string(),
            storage,
            clock,
            cleanup_delay,
            local,
            listener: Mutex::new(None),
        }
    }

    /// This engine's origin id, written as `source` on every event.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.local.subscribe()
    }

    // == Broadcast ==
    /// Writes an event for sibling engines.
    ///
    /// The sender's own subscribers are not notified; see
    /// `broadcast_with_immediate`.
    pub fn broadcast(&self, event_type: &str, payload: Value) -> Result<()> {
        let message = self.envelope(event_type, payload);
        self.write(&message)
    }

    /// Notifies local subscribers first, then writes for sibling engines.
    pub fn broadcast_with_immediate(&self, event_type: &str, payload: Value) -> Result<()> {
        let message = self.envelope(event_type, payload);
        self.dispatch(message.clone());
        self.write(&message)
    }

    fn envelope(&self, event_type: &str, payload: Value) -> BroadcastMessage {
        let timestamp = self.clock.now_ms();
        let mut fields = match payload {
            Value::Object(fields) => fields,
            other => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), other);
                fields
            }
        };
        fields.insert("timestamp".to_string(), Value::from(timestamp));
        fields.insert("source".to_string(), Value::String(self.origin.clone()));

        BroadcastMessage {
            event_type: event_type.to_string(),
            payload: Value::Object(fields),
            source: self.origin.clone(),
            timestamp,
        }
    }

    fn write(&self, message: &BroadcastMessage) -> Result<()> {
        let key = format!("{KEY_PREFIX}{}", message.event_type);
        let encoded = serde_json::to_string(&message.payload)
            .map_err(|e| SyncError::Storage(format!("failed to encode '{key}': {e}")))?;

        self.storage.set_item(&self.origin, &key, encoded.clone())?;
        trace!(%key, "broadcast written");

        let storage = self.storage.clone();
        let origin = self.origin.clone();
        let delay = self.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer event of the same type may own the key by now.
            if storage.get_item(&key).as_deref() == Some(encoded.as_str()) {
                storage.remove_item(&origin, &key);
                trace!(%key, "broadcast key removed");
            }
        });
        Ok(())
    }

    fn dispatch(&self, message: BroadcastMessage) {
        if self.local.send(message).is_err() {
            trace!("no local broadcast subscribers");
        }
    }

    // == Listener ==
    /// Starts forwarding sibling engines' events to local subscribers.
    pub fn start(self: &Arc<Self>) {
        let mut listener = lock(&self.listener);
        if listener.is_some() {
            return;
        }

        let mut changes = self.storage.subscribe();
        let broadcaster = Arc::downgrade(self);
        *listener = Some(tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "broadcast listener lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(broadcaster) = broadcaster.upgrade() else {
                    break;
                };
                if let Some(message) = broadcaster.decode(change) {
                    debug!(event_type = %message.event_type, source = %message.source, "received cross-tab event");
                    broadcaster.dispatch(message);
                }
            }
        }));
        info!(origin = %self.origin, "cross-tab listener started");
    }

    pub fn stop(&self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
            info!("cross-tab listener stopped");
        }
    }

    /// Turns a storage change into a message, if it is a sibling's event.
    fn decode(&self, change: StorageChange) -> Option<BroadcastMessage> {
        if change.writer == self.origin {
            return None;
        }
        let event_type = change.key.strip_prefix(KEY_PREFIX)?.to_string();
        let raw = change.new_value?;

        let payload: Value = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %change.key, error = %e, "ignoring malformed cross-tab event");
                return None;
            }
        };
        let source = payload.get("source").and_then(Value::as_str)?.to_string();
        if source == self.origin {
            return None;
        }
        let timestamp = payload.get("timestamp").and_then(Value::as_u64).unwrap_or(0);

        Some(BroadcastMessage {
            event_type,
            payload,
            source,
            timestamp,
        })
    }
}

impl Drop for CrossTabBroadcaster {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for CrossTabBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossTabBroadcaster")
            .field("origin", &self.origin)
            .field("cleanup_delay", &self.cleanup_delay)
            .finish_non_exhaustive()
    }
}
