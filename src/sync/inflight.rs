//! In-Flight Request Registry
//!
//! At most one outstanding request per data kind. Later callers join the
//! pending request instead of issuing their own. Each request carries a
//! token; only the holder of the current token may publish its result.

use std::collections::HashMap;

use futures::future::{BoxFuture, Shared};
use serde_json::Value;

use crate::error::FetchError;
use crate::kind::DataKind;

/// A pending fetch that any number of callers can await.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

// == In-Flight Request ==
/// One outstanding request.
#[derive(Clone)]
pub struct InFlightRequest {
    pub token: u64,
    pub started_at: u64,
    pub future: SharedFetch,
}

// == Registry ==
/// Outstanding requests keyed by data kind.
#[derive(Default)]
pub struct InFlightRegistry {
    requests: HashMap<DataKind, InFlightRequest>,
    next_token: u64,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next request token.
    pub fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Returns the pending request for `key`, if any.
    pub fn join(&self, key: &DataKind) -> Option<SharedFetch> {
        self.requests.get(key).map(|r| r.future.clone())
    }

    /// Registers a request, superseding any request already pending for `key`.
    ///
    /// Returns the token of the superseded request.
    pub fn register(&mut self, key: DataKind, request: InFlightRequest) -> Option<u64> {
        self.requests.insert(key, request).map(|old| old.token)
    }

    /// Whether `token` is still the current request for `key`.
    pub fn is_current(&self, key: &DataKind, token: u64) -> bool {
        self.requests
            .get(key)
            .map(|r| r.token == token)
            .unwrap_or(false)
    }

    /// Removes the entry for `key` if `token` is still current.
    ///
    /// Returns false when the request was superseded in the meantime, in
    /// which case the newer entry is left in place.
    pub fn complete(&mut self, key: &DataKind, token: u64) -> bool {
        if self.is_current(key, token) {
            self.requests.remove(key);
            true
        } else {
            false
        }
    }

    /// Start time of the pending request for `key`.
    pub fn started_at(&self, key: &DataKind) -> Option<u64> {
        self.requests.get(key).map(|r| r.started_at)
    }

    /// Requests pending since before `cutoff`.
    pub fn older_than(&self, cutoff: u64) -> Vec<(DataKind, u64)> {
        self.requests
            .iter()
            .filter(|(_, r)| r.started_at < cutoff)
            .map(|(k, r)| (k.clone(), r.started_at))
            .collect()
    }

    pub fn contains(&self, key: &DataKind) -> bool {
        self.requests.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
