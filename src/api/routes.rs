//! API Routes
//!
//! Configures the Axum router with all sync daemon endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    activity_handler, get_data_handler, health_handler, invalidate_handler, stats_handler,
    subscribe_handler, unsubscribe_handler, visibility_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /data/:kind` - Read a kind (stale-while-revalidate)
/// - `DELETE /data/:kind` - Invalidate a kind here and in sibling engines
/// - `POST /subscriptions` - Register a consumer
/// - `DELETE /subscriptions/:consumer_id` - Remove a consumer
/// - `POST /activity` - Report a user interaction
/// - `PUT /visibility` - Report visibility changes
/// - `GET /stats` - Engine statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/data/:kind", get(get_data_handler).delete(invalidate_handler))
        .route("/subscriptions", post(subscribe_handler))
        .route("/subscriptions/:consumer_id", delete(unsubscribe_handler))
        .route("/activity", post(activity_handler))
        .route("/visibility", put(visibility_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryStorage;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::engine::SyncEngine;
    use crate::sync::testing::ScriptedClient;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let engine = SyncEngine::with_clock(
            Config::default(),
            Arc::new(ScriptedClient::new(Duration::ZERO)),
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(0)),
        );
        create_router(AppState::new(engine))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_visibility_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/visibility")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"visible":false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_consumer_not_found() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/subscriptions/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
