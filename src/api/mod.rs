//! API Module
//!
//! HTTP handlers and routing for the sync daemon REST API.
//!
//! # Endpoints
//! - `GET /data/:kind` - Read a data kind
//! - `DELETE /data/:kind` - Invalidate a data kind
//! - `POST /subscriptions` - Register a consumer
//! - `DELETE /subscriptions/:consumer_id` - Remove a consumer
//! - `POST /activity` - Report user activity
//! - `PUT /visibility` - Report visibility
//! - `GET /stats` - Get engine statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
