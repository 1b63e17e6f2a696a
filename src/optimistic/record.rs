//! Optimistic Record Module
//!
//! What the engine remembers about each speculative operation.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::kind::DataKind;

// == Target ==
/// What a speculative operation changes: a whole kind or one list item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Target {
    Kind { kind: DataKind },
    Item { kind: DataKind, id: String },
}

impl Target {
    pub fn kind(kind: impl Into<DataKind>) -> Self {
        Target::Kind { kind: kind.into() }
    }

    pub fn item(kind: impl Into<DataKind>, id: impl Into<String>) -> Self {
        Target::Item {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// The data kind whose cached value the operation writes.
    pub fn data_kind(&self) -> &DataKind {
        match self {
            Target::Kind { kind } | Target::Item { kind, .. } => kind,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            Target::Kind { .. } => None,
            Target::Item { id, .. } => Some(id),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Kind { kind } => write!(f, "{kind}"),
            Target::Item { kind, id } => write!(f, "{kind}#{id}"),
        }
    }
}

// == Optimistic State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimisticState {
    /// Speculative value visible to consumers
    Applied,
    /// Real call in flight
    Committing,
    /// Real result is authoritative
    Committed,
    /// Real call failed, rollback scheduled
    RollingBack,
    /// Original value restored
    RolledBack,
}

impl OptimisticState {
    pub fn is_resolved(self) -> bool {
        matches!(self, OptimisticState::Committed | OptimisticState::RolledBack)
    }
}

// == Optimistic Record ==
/// The newest unresolved operation on a target.
#[derive(Debug, Clone, Serialize)]
pub struct OptimisticRecord {
    pub operation_id: u64,
    pub target: Target,
    /// Value (or item) the operation made visible
    pub speculative: Value,
    /// Last known-good value (or item) before the first unresolved
    /// operation on this target; None when there was none
    pub original: Option<Value>,
    /// Index of the original item in its list
    pub position: Option<usize>,
    pub state: OptimisticState,
    pub created_at: u64,
}

// == Optimistic Outcome ==
/// Result of a committed operation.
#[derive(Debug, Clone, Serialize)]
pub struct OptimisticOutcome {
    pub operation_id: u64,
    pub target: Target,
    /// What the real call returned
    pub value: Value,
    /// A newer operation on the target took over; the result was not applied
    pub superseded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_display() {
        assert_eq!(Target::kind("dashboard_stats").to_string(), "dashboard_stats");
        assert_eq!(Target::item("clients", "42").to_string(), "clients#42");
    }

    #[test]
    fn test_target_accessors() {
        let target = Target::item("staff", "7");
        assert_eq!(target.data_kind().as_str(), "staff");
        assert_eq!(target.item_id(), Some("7"));
        assert_eq!(Target::kind("staff").item_id(), None);
    }

    #[test]
    fn test_resolved_states() {
        assert!(OptimisticState::Committed.is_resolved());
        assert!(OptimisticState::RolledBack.is_resolved());
        assert!(!OptimisticState::RollingBack.is_resolved());
        assert!(!OptimisticState::Applied.is_resolved());
    }
}
