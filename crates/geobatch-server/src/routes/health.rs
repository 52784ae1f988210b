//! Health and metrics endpoints

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// Liveness plus engine reachability and sink counters.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let engine_up = state.geocoder.healthcheck().await;
    let status = if engine_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if engine_up { "healthy" } else { "degraded" },
            "geocoder": if engine_up { "reachable" } else { "unreachable" },
            "sinks": state.fanout.stats(),
        })),
    )
}

/// JSON snapshot of request counters and per-sink delivered/dropped counts.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "requests": state.stats.snapshot(),
        "sinks": state.fanout.stats(),
    }))
}
