//! Request and Response models for the sync daemon API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{SubscribeRequest, VisibilityRequest};
pub use responses::{
    ActivityResponse, DataResponse, HealthResponse, InvalidateResponse, StatsResponse,
    SubscriptionResponse, UnsubscribeResponse,
};
