//! Broadcast Module
//!
//! Cross-engine event propagation over shared storage.

mod broadcaster;
mod storage;

pub use broadcaster::{BroadcastMessage, CrossTabBroadcaster, KEY_PREFIX};
pub use storage::{MemoryStorage, SharedStorage, StorageChange};
