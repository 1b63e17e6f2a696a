//! Data Kind Module
//!
//! A data kind names one category of fetchable server data. Request
//! parameters ride along as a query suffix, so `appointments?date=2024-05-01`
//! and `appointments` are cached and deduplicated separately while sharing
//! the configuration of their base kind.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum allowed kind length in bytes
pub const MAX_KIND_LENGTH: usize = 256;

// == Data Kind ==
/// Cache and deduplication key for one category of server data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataKind(String);

impl DataKind {
    /// Creates a data kind from any string-like value.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Returns the full kind, including any parameter suffix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the kind without its parameter suffix.
    pub fn base(&self) -> &str {
        match self.0.split_once('?') {
            Some((base, _)) => base,
            None => &self.0,
        }
    }

    /// Returns the parameter suffix, if any.
    pub fn params(&self) -> Option<&str> {
        self.0.split_once('?').map(|(_, params)| params)
    }

    /// Checks that the kind can be used as a cache key.
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.base().is_empty() {
            return Some("Data kind cannot be empty".to_string());
        }
        if self.0.len() > MAX_KIND_LENGTH {
            return Some(format!(
                "Data kind exceeds maximum length of {} bytes",
                MAX_KIND_LENGTH
            ));
        }
        if self.base().contains('/') {
            return Some("Data kind cannot contain '/'".to_string());
        }
        None
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for DataKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

impl Borrow<str> for DataKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}
