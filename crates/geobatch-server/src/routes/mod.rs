//! HTTP routes

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::middleware;
use crate::state::AppState;

pub mod batch;
pub mod health;
pub mod single;

/// Build the application router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/search/csv", post(batch::csv_search))
        .route("/search/csv/", post(batch::csv_search))
        .route("/reverse/csv", post(batch::csv_reverse))
        .route("/reverse/csv/", post(batch::csv_reverse))
        .route("/search", get(single::search))
        .route("/reverse", get(single::reverse))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        // The upload transport is size-unbounded by contract; the ingestion
        // guard enforces the actual limits.
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&state.config.cors))
        .with_state(state)
}
