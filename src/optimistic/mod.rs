//! Optimistic Module
//!
//! Speculative writes with commit/rollback, for whole kinds and for items
//! of list-valued kinds.

mod engine;
pub mod list;
mod record;

pub use engine::OptimisticEngine;
pub use record::{OptimisticOutcome, OptimisticRecord, OptimisticState, Target};
