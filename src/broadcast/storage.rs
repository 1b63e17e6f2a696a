//! Shared Storage Module
//!
//! A string-keyed store shared by every engine of one origin, with change
//! notifications. Engines in other processes see each write as a
//! `StorageChange`; the writer identifies itself so it can skip its own.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{Result, SyncError};
use crate::sync::{read_lock, write_lock};

/// Buffered change notifications per listener
const CHANGE_CHANNEL_CAPACITY: usize = 256;

// == Storage Change ==
/// One write or removal, as observed by listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageChange {
    pub key: String,
    /// New value; None for a removal
    pub new_value: Option<String>,
    /// Origin id of the engine that made the change
    pub writer: String,
}

// == Shared Storage Trait ==
pub trait SharedStorage: Send + Sync + Debug {
    fn set_item(&self, writer: &str, key: &str, value: String) -> Result<()>;

    fn remove_item(&self, writer: &str, key: &str);

    fn get_item(&self, key: &str) -> Option<String>;

    /// Change feed; every write or removal by any writer.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

// == Memory Storage ==
/// In-process `SharedStorage` over a tokio broadcast channel.
#[derive(Debug)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
    /// Total bytes of keys and values allowed, None for unlimited
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            items: RwLock::new(HashMap::new()),
            changes,
            quota_bytes: None,
        }
    }

    /// Rejects writes that would exceed `quota_bytes` in total.
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn len(&self) -> usize {
        read_lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.items).is_empty()
    }

    fn notify(&self, change: StorageChange) {
        if self.changes.send(change).is_err() {
            trace!("no storage listeners");
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStorage for MemoryStorage {
    fn set_item(&self, writer: &str, key: &str, value: String) -> Result<()> {
        {
            let mut items = write_lock(&self.items);
            if let Some(quota) = self.quota_bytes {
                let used: usize = items
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if used + key.len() + value.len() > quota {
                    return Err(SyncError::Storage(format!(
                        "quota of {quota} bytes exceeded writing '{key}'"
                    )));
                }
            }
            items.insert(key.to_string(), value.clone());
        }

        self.notify(StorageChange {
            key: key.to_string(),
            new_value: Some(value),
            writer: writer.to_string(),
        });
        Ok(())
    }

    fn remove_item(&self, writer: &str, key: &str) {
        let removed = write_lock(&self.items).remove(key).is_some();
        if removed {
            self.notify(StorageChange {
                key: key.to_string(),
                new_value: None,
                writer: writer.to_string(),
            });
        }
    }

    fn get_item(&self, key: &str) -> Option<String> {
        read_lock(&self.items).get(key).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
