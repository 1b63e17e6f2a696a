//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with freshness support.

use serde::Serialize;
use serde_json::Value;

use crate::config::DataKindConfig;
use crate::kind::DataKind;

// == Error Info ==
/// The most recent refresh failure attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// Failure reason
    pub message: String,
    /// When the failure happened (Unix milliseconds)
    pub occurred_at: u64,
    /// Failures in a row since the last successful fetch
    pub consecutive_failures: u32,
}

// == Freshness ==
/// Two-tier freshness of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Within the TTL, serve as is
    Fresh,
    /// Past the TTL but usable while a refresh runs in the background
    Stale,
    /// Too old to serve without a blocking fetch
    Expired,
}

// == Cache Entry ==
/// Represents a single cache entry with value and access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The kind this entry belongs to
    pub key: DataKind,
    /// The last good (or speculative) value
    pub value: Value,
    /// When the value was fetched (Unix milliseconds)
    pub fetched_at: u64,
    /// Number of reads
    pub access_count: u64,
    /// Last read (Unix milliseconds)
    pub last_accessed_at: u64,
    /// Failure of the latest refresh, if it failed
    pub last_error: Option<ErrorInfo>,
    /// Unresolved optimistic operations holding this entry
    pub pinned: u32,
    /// Created by an optimistic write and never fetched from the server
    pub speculative: bool,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry fetched at `now`.
    pub fn new(key: DataKind, value: Value, now: u64) -> Self {
        Self {
            key,
            value,
            fetched_at: now,
            access_count: 0,
            last_accessed_at: now,
            last_error: None,
            pinned: 0,
            speculative: false,
        }
    }

    /// Creates an entry holding only an optimistic value.
    ///
    /// It never counts as fresh, so the next read or tick fetches the real
    /// value.
    pub fn speculative(key: DataKind, value: Value, now: u64) -> Self {
        Self {
            speculative: true,
            ..Self::new(key, value, now)
        }
    }

    // == Age ==
    /// Milliseconds since the value was fetched.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.fetched_at)
    }

    // == Is Valid ==
    /// Checks whether the entry is still inside its freshness window.
    ///
    /// Boundary condition: the entry is valid for ages in `[0, ttl)` and
    /// stale from the exact moment the TTL has fully elapsed.
    pub fn is_valid(&self, now: u64, ttl_ms: u64) -> bool {
        !self.speculative && self.age_ms(now) < ttl_ms
    }

    // == Freshness ==
    /// Classifies the entry as fresh, stale-but-usable or expired.
    ///
    /// Fresh for `[0, ttl)`, stale for `[ttl, 2·ttl)`, expired after that
    /// or once the absolute `max_age` is reached. A speculative-only entry
    /// is always expired.
    pub fn freshness(&self, now: u64, config: &DataKindConfig) -> Freshness {
        let age = self.age_ms(now);
        if self.speculative || age >= config.max_age_ms {
            Freshness::Expired
        } else if age < config.ttl_ms {
            Freshness::Fresh
        } else if age < config.ttl_ms.saturating_mul(2) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    // == Touch ==
    /// Records a read.
    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    /// Returns true while an optimistic operation holds the entry.
    pub fn is_pinned(&self) -> bool {
        self.pinned > 0
    }
}
