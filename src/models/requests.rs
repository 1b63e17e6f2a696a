//! Request DTOs for the sync daemon API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::kind::DataKind;
use crate::sync::{Priority, SubscribeOptions};

/// Maximum allowed consumer id length
const MAX_CONSUMER_ID_LENGTH: usize = 128;

/// Request body for POST /subscriptions
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    /// Stable id of the consumer; resubscribing with it replaces the kind set
    pub consumer_id: String,
    /// Kinds the consumer needs, optionally with a `?params` suffix
    pub data_kinds: Vec<DataKind>,
    #[serde(default)]
    pub priority: Priority,
}

impl SubscribeRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.consumer_id.is_empty() {
            return Some("Consumer id cannot be empty".to_string());
        }
        if self.consumer_id.len() > MAX_CONSUMER_ID_LENGTH {
            return Some(format!(
                "Consumer id exceeds maximum length of {} characters",
                MAX_CONSUMER_ID_LENGTH
            ));
        }
        if self.data_kinds.is_empty() {
            return Some("At least one data kind is required".to_string());
        }
        self.data_kinds.iter().find_map(DataKind::validate)
    }

    pub fn options(&self) -> SubscribeOptions {
        SubscribeOptions {
            priority: self.priority,
        }
    }
}

/// Request body for PUT /visibility
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}
