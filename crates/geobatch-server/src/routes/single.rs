//! Single-shot geocoding endpoints
//!
//! Thin proxies to the engine, wrapped in request-level telemetry so single
//! queries and batch uploads correlate the same way across backends.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::collections::HashMap;

use geobatch_common::PipelineError;
use geobatch_telemetry::EventStatus;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /search?q=...&lat=&lon=&limit=` with extra parameters passed to the
/// engine as filters.
pub async fn search(
    State(state): State<AppState>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    state.stats.record_request();

    let query = params.remove("q").unwrap_or_default();
    let lat = params.remove("lat").and_then(|v| v.parse::<f64>().ok());
    let lon = params.remove("lon").and_then(|v| v.parse::<f64>().ok());
    let limit = params.remove("limit").and_then(|v| v.parse::<usize>().ok());
    let bias = match (lat, lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    };
    let filters: Vec<(String, String)> = params.into_iter().collect();

    let event = state.fanout.start_request(
        "search",
        vec![("query.length".into(), (query.len() as i64).into())],
    );

    match state.geocoder.search(&query, bias, &filters).await {
        Ok(mut candidates) => {
            if let Some(limit) = limit {
                candidates.truncate(limit);
            }
            state.fanout.finish(
                event,
                EventStatus::Ok,
                vec![("results.count".into(), (candidates.len() as i64).into())],
            );
            Ok(Json(json!({ "query": query, "candidates": candidates })))
        },
        Err(err) => {
            state.stats.record_error();
            state.fanout.finish(event, EventStatus::Error, vec![]);
            Err(ApiError::from(PipelineError::GeocodeCallFailed(
                err.to_string(),
            )))
        },
    }
}

/// `GET /reverse?lat=...&lon=...` with extra parameters passed as filters.
pub async fn reverse(
    State(state): State<AppState>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    state.stats.record_request();

    let lat = params.remove("lat").and_then(|v| v.parse::<f64>().ok());
    let lon = params.remove("lon").and_then(|v| v.parse::<f64>().ok());
    let (Some(lat), Some(lon)) = (lat, lon) else {
        return Err(ApiError::bad_request(
            "lat and lon query parameters are required",
        ));
    };
    let filters: Vec<(String, String)> = params.into_iter().collect();

    let event = state.fanout.start_request("reverse", vec![]);

    match state.geocoder.reverse(lat, lon, &filters).await {
        Ok(candidates) => {
            state.fanout.finish(
                event,
                EventStatus::Ok,
                vec![("results.count".into(), (candidates.len() as i64).into())],
            );
            Ok(Json(
                json!({ "lat": lat, "lon": lon, "candidates": candidates }),
            ))
        },
        Err(err) => {
            state.stats.record_error();
            state.fanout.finish(event, EventStatus::Error, vec![]);
            Err(ApiError::from(PipelineError::GeocodeCallFailed(
                err.to_string(),
            )))
        },
    }
}
