//! Event Bus Module
//!
//! Consumers learn about new values through `DataUpdate`s. Informational
//! conditions that are not errors (superseded results, pressure changes)
//! travel separately as `SyncEvent`s.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::cache::{ErrorInfo, MemoryPressure};
use crate::kind::DataKind;

/// Buffered updates per receiver before slow consumers start lagging
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

// == Update Origin ==
/// What produced a data update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrigin {
    /// A network fetch completed
    Fetch,
    /// A speculative value was applied
    Optimistic,
    /// The real call behind a speculative value succeeded
    Committed,
    /// A failed speculative value was reverted
    RolledBack,
    /// A sibling tab reported a change
    Remote,
    /// The entry was dropped
    Invalidated,
}

// == Data Update ==
/// New state of one data kind as seen by consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataUpdate {
    pub kind: DataKind,
    /// Current value; None when nothing usable is cached
    pub value: Option<Value>,
    /// Present when the latest refresh failed
    pub error: Option<ErrorInfo>,
    pub origin: UpdateOrigin,
}

// == Sync Event ==
/// Informational, non-fatal engine conditions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A fetch result was dropped because a newer request was started
    DeduplicationRace { kind: DataKind, token: u64 },
    /// Cache occupancy crossed a pressure threshold
    EvictionPressure {
        from: MemoryPressure,
        to: MemoryPressure,
        usage: f64,
    },
    /// A superseded optimistic operation resolved and was ignored
    OperationSuperseded { target: String, operation_id: u64 },
}

// == Event Bus ==
/// Fan-out of updates and events to every interested receiver.
#[derive(Debug, Clone)]
pub struct EventBus {
    updates: broadcast::Sender<DataUpdate>,
    events: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self { updates, events }
    }

    /// Publishes a data update. Having no receivers is fine.
    pub fn publish(&self, update: DataUpdate) {
        if self.updates.send(update).is_err() {
            trace!("no receivers for data update");
        }
    }

    /// Publishes an informational event. Having no receivers is fine.
    pub fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            trace!("no receivers for sync event");
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<DataUpdate> {
        self.updates.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_updates();

        bus.publish(DataUpdate {
            kind: "staff".into(),
            value: Some(json!([])),
            error: None,
            origin: UpdateOrigin::Fetch,
        });

        let update = rx.recv().await.unwrap();
        assert_eq!(update.kind, DataKind::from("staff"));
        assert_eq!(update.origin, UpdateOrigin::Fetch);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::DeduplicationRace {
            kind: "staff".into(),
            token: 1,
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = SyncEvent::EvictionPressure {
            from: MemoryPressure::Normal,
            to: MemoryPressure::Critical,
            usage: 0.96,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "eviction_pressure");
        assert_eq!(json["to"], "critical");
    }
}
