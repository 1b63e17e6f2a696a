//! Tab Sync - A client-side data synchronization engine
//!
//! Keeps server data fresh for many consumers with one deduplicated poller,
//! a TTL cache with stale-while-revalidate, pressure-aware eviction,
//! optimistic updates and cross-tab event mirroring.

pub mod api;
pub mod broadcast;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod kind;
pub mod models;
pub mod optimistic;
pub mod sync;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use engine::SyncEngine;
pub use error::{FetchError, Result, SyncError};
pub use kind::DataKind;
