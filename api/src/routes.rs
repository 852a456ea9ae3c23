use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Identity-provider webhook ingest (signed)
        .route(
            "/api/webhooks/identity",
            post(handlers::webhooks::handle_identity_webhook),
        )
        // Application event ingest (internal)
        .route(
            "/api/events/task-assigned",
            post(handlers::events::task_assigned),
        )
        .route(
            "/api/events/task-deleted",
            post(handlers::events::task_deleted),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
