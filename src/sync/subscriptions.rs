//! Subscription Registry
//!
//! Which consumers are mounted and which data kinds they need. The union of
//! all subscriptions is the set the poller keeps fresh.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::kind::DataKind;

// == Priority ==
/// Consumer priority; higher-priority kinds are fetched first each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

// == Subscribe Options ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    #[serde(default)]
    pub priority: Priority,
}

// == Subscription ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub consumer_id: String,
    pub data_kinds: BTreeSet<DataKind>,
    pub priority: Priority,
    pub created_at: u64,
}

/// What a subscribe call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// New consumer
    Created,
    /// Same consumer, same kinds and priority: nothing to do
    Unchanged,
    /// Same consumer with a different kind set or priority
    Replaced,
}

// == Registry ==
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a consumer's subscription.
    ///
    /// Idempotent for a repeated call with the same id, kinds and priority.
    pub fn subscribe(
        &mut self,
        consumer_id: &str,
        data_kinds: BTreeSet<DataKind>,
        options: SubscribeOptions,
        now: u64,
    ) -> SubscribeOutcome {
        if let Some(existing) = self.subscriptions.get_mut(consumer_id) {
            if existing.data_kinds == data_kinds && existing.priority == options.priority {
                return SubscribeOutcome::Unchanged;
            }
            existing.data_kinds = data_kinds;
            existing.priority = options.priority;
            return SubscribeOutcome::Replaced;
        }

        self.subscriptions.insert(
            consumer_id.to_string(),
            Subscription {
                consumer_id: consumer_id.to_string(),
                data_kinds,
                priority: options.priority,
                created_at: now,
            },
        );
        SubscribeOutcome::Created
    }

    /// Removes a consumer. Removing an unknown consumer is a no-op.
    pub fn unsubscribe(&mut self, consumer_id: &str) -> Option<Subscription> {
        self.subscriptions.remove(consumer_id)
    }

    pub fn get(&self, consumer_id: &str) -> Option<&Subscription> {
        self.subscriptions.get(consumer_id)
    }

    /// Union of all subscribed kinds, highest subscriber priority first.
    pub fn needed_kinds(&self) -> Vec<(DataKind, Priority)> {
        let mut needed: BTreeMap<DataKind, Priority> = BTreeMap::new();
        for subscription in self.subscriptions.values() {
            for kind in &subscription.data_kinds {
                let slot = needed.entry(kind.clone()).or_insert(subscription.priority);
                *slot = (*slot).max(subscription.priority);
            }
        }

        let mut ordered: Vec<(DataKind, Priority)> = needed.into_iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ordered
    }

    /// Whether any consumer needs `kind`.
    pub fn is_needed(&self, kind: &DataKind) -> bool {
        self.subscriptions
            .values()
            .any(|s| s.data_kinds.contains(kind))
    }

    pub fn consumers(&self) -> Vec<&Subscription> {
        self.subscriptions.values().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(names: &[&str]) -> BTreeSet<DataKind> {
        names.iter().map(|n| DataKind::from(*n)).collect()
    }

    fn with_priority(priority: Priority) -> SubscribeOptions {
        SubscribeOptions { priority }
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let first = registry.subscribe("a", kinds(&["appointments"]), SubscribeOptions::default(), 0);
        let second = registry.subscribe("a", kinds(&["appointments"]), SubscribeOptions::default(), 5);

        assert_eq!(first, SubscribeOutcome::Created);
        assert_eq!(second, SubscribeOutcome::Unchanged);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().created_at, 0);
    }

    #[test]
    fn test_subscribe_replaces_kind_set() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("a", kinds(&["appointments"]), SubscribeOptions::default(), 0);
        let outcome = registry.subscribe("a", kinds(&["staff"]), SubscribeOptions::default(), 0);

        assert_eq!(outcome, SubscribeOutcome::Replaced);
        assert!(!registry.is_needed(&"appointments".into()));
        assert!(registry.is_needed(&"staff".into()));
    }

    #[test]
    fn test_needed_kinds_union_ordered_by_priority() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("calendar", kinds(&["appointments", "staff"]), with_priority(Priority::Normal), 0);
        registry.subscribe("header", kinds(&["notifications"]), with_priority(Priority::High), 0);
        registry.subscribe("sidebar", kinds(&["staff", "services"]), with_priority(Priority::Low), 0);

        let needed = registry.needed_kinds();
        assert_eq!(
            needed,
            vec![
                (DataKind::from("notifications"), Priority::High),
                (DataKind::from("appointments"), Priority::Normal),
                (DataKind::from("staff"), Priority::Normal),
                (DataKind::from("services"), Priority::Low),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.unsubscribe("ghost").is_none());

        registry.subscribe("a", kinds(&["clients"]), SubscribeOptions::default(), 0);
        assert!(registry.unsubscribe("a").is_some());
        assert!(registry.is_empty());
        assert!(registry.needed_kinds().is_empty());
    }
}
