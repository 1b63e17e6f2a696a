//! Cache Module
//!
//! Provides the TTL cache store, its freshness model and the
//! pressure-aware eviction policy.

mod entry;
pub mod eviction;
mod memory;
mod schema;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{CacheEntry, ErrorInfo, Freshness};
pub use eviction::{EvictionCandidate, MemoryPressure, PriorityScorer};
pub use memory::{MemoryManager, MemoryReport};
pub use schema::{SchemaRegistry, ValueShape};
pub use stats::CacheStats;
pub use store::CacheStore;
