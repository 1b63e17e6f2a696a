//! Eviction Policy Module
//!
//! Priority scoring and victim selection for the memory manager.
//!
//! This is not a strict LRU: the score blends how often and how recently an
//! entry was read with the static business weight of its kind, minus a
//! penalty for age. Lowest scores go first.

use serde::Serialize;

use crate::cache::{CacheEntry, Freshness};
use crate::config::DataKindConfig;
use crate::kind::DataKind;

/// Usage at which pressure becomes `Warning`
pub const WARNING_THRESHOLD: f64 = 0.80;

/// Usage at which pressure becomes `Critical`
pub const CRITICAL_THRESHOLD: f64 = 0.95;

// == Memory Pressure ==
/// Occupancy classification of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Normal,
    Warning,
    Critical,
}

impl MemoryPressure {
    /// Classifies a usage ratio (entries / capacity).
    pub fn from_usage(usage: f64) -> Self {
        if usage >= CRITICAL_THRESHOLD {
            MemoryPressure::Critical
        } else if usage >= WARNING_THRESHOLD {
            MemoryPressure::Warning
        } else {
            MemoryPressure::Normal
        }
    }

    /// Share of entries a cleanup pass may remove at this pressure.
    pub fn eviction_fraction(&self) -> f64 {
        match self {
            MemoryPressure::Normal => 0.10,
            MemoryPressure::Warning => 0.30,
            MemoryPressure::Critical => 0.50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryPressure::Normal => "normal",
            MemoryPressure::Warning => "warning",
            MemoryPressure::Critical => "critical",
        }
    }
}

// == Priority Scorer ==
/// Weights of the eviction score.
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    /// Points per recorded read
    pub frequency_weight: f64,
    /// Reads older than this earn no recency bonus
    pub recency_window_ms: u64,
    /// Bonus for an entry read just now
    pub max_recency_bonus: f64,
    /// Points lost per minute since the value was fetched
    pub age_penalty_per_minute: f64,
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self {
            frequency_weight: 10.0,
            recency_window_ms: 300_000,
            max_recency_bonus: 50.0,
            age_penalty_per_minute: 1.0,
        }
    }
}

impl PriorityScorer {
    /// `access_count·k1 + recency_bonus + weight − age`
    pub fn score(&self, entry: &CacheEntry, config: &DataKindConfig, now: u64) -> f64 {
        let frequency = entry.access_count as f64 * self.frequency_weight;
        let since_access = now.saturating_sub(entry.last_accessed_at) as f64;
        let recency =
            (1.0 - since_access / self.recency_window_ms as f64).max(0.0) * self.max_recency_bonus;
        let age_minutes = entry.age_ms(now) as f64 / 60_000.0;

        frequency + recency + config.priority_weight - age_minutes * self.age_penalty_per_minute
    }
}

// == Eviction Candidate ==
/// A scored entry considered by one cleanup pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub key: DataKind,
    pub score: f64,
    /// Inside its minimum retention window or held by an optimistic update
    pub protected: bool,
    /// Past its hard expiry
    pub expired: bool,
}

impl EvictionCandidate {
    pub fn from_entry(
        entry: &CacheEntry,
        config: &DataKindConfig,
        scorer: &PriorityScorer,
        now: u64,
    ) -> Self {
        Self {
            key: entry.key.clone(),
            score: scorer.score(entry, config, now),
            protected: entry.age_ms(now) < config.min_retention_ms || entry.is_pinned(),
            expired: entry.freshness(now, config) == Freshness::Expired,
        }
    }
}

// == Victim Selection ==
/// Picks the entries to evict, lowest score first.
///
/// Protected candidates are never chosen. Under normal pressure only
/// hard-expired entries are eligible and at most a tenth of the cache goes;
/// under warning and critical pressure at least one entry goes when any is
/// eligible.
pub fn select_victims(candidates: Vec<EvictionCandidate>, pressure: MemoryPressure) -> Vec<DataKind> {
    let total = candidates.len();
    if total == 0 {
        return Vec::new();
    }

    let fraction = pressure.eviction_fraction();
    let budget = match pressure {
        MemoryPressure::Normal => (total as f64 * fraction).ceil() as usize,
        MemoryPressure::Warning | MemoryPressure::Critical => {
            ((total as f64 * fraction).floor() as usize).max(1)
        }
    };

    let mut eligible: Vec<EvictionCandidate> = candidates
        .into_iter()
        .filter(|c| !c.protected)
        .filter(|c| pressure != MemoryPressure::Normal || c.expired)
        .collect();

    eligible.sort_by(|a, b| a.score.total_cmp(&b.score));
    eligible.into_iter().take(budget).map(|c| c.key).collect()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(key: &str, score: f64, protected: bool) -> EvictionCandidate {
        EvictionCandidate {
            key: DataKind::from(key),
            score,
            protected,
            expired: false,
        }
    }

    #[test]
    fn test_pressure_classification() {
        assert_eq!(MemoryPressure::from_usage(0.0), MemoryPressure::Normal);
        assert_eq!(MemoryPressure::from_usage(0.79), MemoryPressure::Normal);
        assert_eq!(MemoryPressure::from_usage(0.80), MemoryPressure::Warning);
        assert_eq!(MemoryPressure::from_usage(0.94), MemoryPressure::Warning);
        assert_eq!(MemoryPressure::from_usage(0.95), MemoryPressure::Critical);
        assert_eq!(MemoryPressure::from_usage(1.2), MemoryPressure::Critical);
    }

    #[test]
    fn test_critical_scenario_keeps_protected_entry() {
        // A: 10, B: 50, C: 5 but still inside min retention
        let candidates = vec![
            candidate("A", 10.0, false),
            candidate("B", 50.0, false),
            candidate("C", 5.0, true),
        ];

        let victims = select_victims(candidates, MemoryPressure::Critical);
        assert_eq!(victims, vec![DataKind::from("A")]);
    }

    #[test]
    fn test_warning_budget() {
        let candidates: Vec<_> = (0..10)
            .map(|i| candidate(&format!("k{i}"), i as f64, false))
            .collect();

        let victims = select_victims(candidates, MemoryPressure::Warning);
        assert_eq!(
            victims,
            vec![DataKind::from("k0"), DataKind::from("k1"), DataKind::from("k2")]
        );
    }

    #[test]
    fn test_normal_pressure_only_takes_expired() {
        let mut stale = candidate("old", 90.0, false);
        stale.expired = true;
        let candidates = vec![candidate("cheap", 1.0, false), stale];

        let victims = select_victims(candidates, MemoryPressure::Normal);
        assert_eq!(victims, vec![DataKind::from("old")]);
    }

    #[test]
    fn test_all_protected_evicts_nothing() {
        let candidates = vec![candidate("a", 1.0, true), candidate("b", 2.0, true)];
        assert!(select_victims(candidates, MemoryPressure::Critical).is_empty());
    }

    #[test]
    fn test_score_components() {
        let scorer = PriorityScorer::default();
        let config = DataKindConfig::new(30_000, 300_000, 0, 100.0);
        let mut entry = CacheEntry::new("appointments".into(), json!([]), 0);
        entry.access_count = 3;
        entry.last_accessed_at = 0;

        // Read just now, fetched just now: 30 + 50 + 100 - 0
        assert_eq!(scorer.score(&entry, &config, 0), 180.0);

        // Ten minutes later: no recency bonus, 10 points of age penalty
        assert_eq!(scorer.score(&entry, &config, 600_000), 120.0);
    }

    #[test]
    fn test_candidate_protection() {
        let scorer = PriorityScorer::default();
        let config = DataKindConfig::new(30_000, 300_000, 60_000, 1.0);
        let mut entry = CacheEntry::new("clients".into(), json!([]), 0);

        assert!(EvictionCandidate::from_entry(&entry, &config, &scorer, 59_999).protected);
        assert!(!EvictionCandidate::from_entry(&entry, &config, &scorer, 60_000).protected);

        entry.pinned = 1;
        assert!(EvictionCandidate::from_entry(&entry, &config, &scorer, 120_000).protected);
    }
}
