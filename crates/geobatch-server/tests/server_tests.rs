//! Integration tests for the HTTP surface
//!
//! These drive the full router with tower's `oneshot`:
//! - batch uploads stream annotated CSV back
//! - pre-decode rejections surface as JSON errors with machine codes
//! - single-shot endpoints proxy the engine
//! - health/metrics report sink and request counters

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use geobatch_pipeline::{Candidate, Geocoder};
use geobatch_server::{config::Config, routes, state::AppState};
use geobatch_telemetry::TelemetryFanout;

#[derive(Debug, Default)]
struct StubGeocoder {
    calls: AtomicU64,
    filters_seen: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn search(
        &self,
        query: &str,
        _bias_center: Option<(f64, f64)>,
        filters: &[(String, String)],
    ) -> anyhow::Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.filters_seen
            .lock()
            .expect("lock")
            .extend(filters.iter().cloned());
        if query.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![Candidate {
            label: format!("geocoded: {query}"),
            score: 0.95,
            lon: 2.3306,
            lat: 48.8686,
            postcode: "75002".to_string(),
            city: "Paris".to_string(),
            context: "75, Paris".to_string(),
        }])
    }

    async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        _filters: &[(String, String)],
    ) -> anyhow::Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Candidate {
            label: format!("reverse: {lat} {lon}"),
            score: 0.9,
            lon,
            lat,
            ..Candidate::default()
        }])
    }
}

fn test_app(config: Config) -> (Router, Arc<StubGeocoder>) {
    let geocoder = Arc::new(StubGeocoder::default());
    let fanout = Arc::new(TelemetryFanout::new());
    let state = AppState::new(
        Arc::clone(&geocoder) as Arc<dyn Geocoder>,
        fanout,
        Arc::new(config),
    );
    (routes::router(state), geocoder)
}

const BOUNDARY: &str = "geobatch-test-boundary";

/// Build a multipart body; `filename: Some(..)` marks file parts.
fn multipart_body(fields: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: text/csv\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .expect("request")
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

#[tokio::test]
async fn test_csv_search_streams_annotated_rows() {
    let (app, _) = test_app(Config::default());
    let body = multipart_body(&[(
        "data",
        Some("upload.csv"),
        "address,city\n1 rue de la paix,paris\n,\n",
    )]);

    let response = app
        .oneshot(multipart_request("/search/csv", body))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/csv; charset=utf-8")
    );

    let text = body_string(response).await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("address,city,result_label,result_score"));
    assert!(lines[1].contains("geocoded: 1 rue de la paix paris"));
    // Empty row keeps its two original columns and empty result columns.
    assert_eq!(lines[2], ",,,,,,,,");
}

#[tokio::test]
async fn test_csv_search_with_declared_columns_and_filters() {
    let (app, geocoder) = test_app(Config::default());
    let body = multipart_body(&[
        ("columns", None, "address"),
        (
            "data",
            Some("upload.csv"),
            "address,insee\n1 rue de la paix,80021\n",
        ),
    ]);

    let response = app
        .oneshot(multipart_request("/search/csv?citycode=insee", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let text = body_string(response).await;
    assert!(text.contains("geocoded: 1 rue de la paix"));
    assert_eq!(
        geocoder.filters_seen.lock().expect("lock").as_slice(),
        &[("citycode".to_string(), "80021".to_string())]
    );
}

#[tokio::test]
async fn test_unknown_column_is_a_structured_error() {
    let (app, _) = test_app(Config::default());
    let body = multipart_body(&[
        ("columns", None, "ghost"),
        ("data", Some("upload.csv"), "address\n1 rue x\n"),
    ]);

    let response = app
        .oneshot(multipart_request("/search/csv", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(error["error"], "unknown_column");
    assert!(error["message"].as_str().expect("message").contains("ghost"));
    assert!(error["timestamp"].is_string());
}

#[tokio::test]
async fn test_declared_length_over_limit_rejected_up_front() {
    let mut config = Config::default();
    config.limits.max_upload_bytes = 64;
    let (app, geocoder) = test_app(config);

    let body = multipart_body(&[(
        "data",
        Some("upload.csv"),
        "address\n1 rue de la paix un contenu bien trop long pour la limite\n",
    )]);
    assert!(body.len() > 64);

    let response = app
        .oneshot(multipart_request("/search/csv", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let error: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(error["error"], "payload_too_large");
    // Rejected before any decode: the engine was never called.
    assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_too_many_parts_rejected() {
    let mut config = Config::default();
    config.limits.max_parts = 2;
    let (app, _) = test_app(config);

    let body = multipart_body(&[
        ("columns", None, "address"),
        ("columns", None, "city"),
        ("data", Some("upload.csv"), "address,city\n1 rue x,paris\n"),
    ]);

    let response = app
        .oneshot(multipart_request("/search/csv", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let error: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(error["error"], "too_many_parts");
}

#[tokio::test]
async fn test_missing_data_field_is_a_structured_error() {
    let (app, _) = test_app(Config::default());
    let body = multipart_body(&[("columns", None, "address")]);

    let response = app
        .oneshot(multipart_request("/search/csv", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(error["error"], "decode_error");
}

#[tokio::test]
async fn test_csv_reverse_requires_coordinate_columns() {
    let (app, _) = test_app(Config::default());
    let body = multipart_body(&[(
        "data",
        Some("upload.csv"),
        "address,city\n1 rue x,paris\n",
    )]);

    let response = app
        .oneshot(multipart_request("/reverse/csv", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(error["error"], "missing_coordinate_columns");
}

#[tokio::test]
async fn test_csv_reverse_with_coordinates() {
    let (app, _) = test_app(Config::default());
    let body = multipart_body(&[(
        "data",
        Some("upload.csv"),
        "lat,lon\n49.8974,2.2901\n",
    )]);

    let response = app
        .oneshot(multipart_request("/reverse/csv", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let text = body_string(response).await;
    assert!(text.contains("reverse: 49.8974 2.2901"));
}

#[tokio::test]
async fn test_trailing_slash_route_works() {
    let (app, _) = test_app(Config::default());
    let body = multipart_body(&[("data", Some("upload.csv"), "address\n1 rue x\n")]);

    let response = app
        .oneshot(multipart_request("/search/csv/", body))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_single_search_returns_candidates() {
    let (app, _) = test_app(Config::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/search?q=1+rue+de+la+paix&limit=5")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let payload: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(payload["candidates"][0]["city"], "Paris");
}

#[tokio::test]
async fn test_single_reverse_requires_coordinates() {
    let (app, _) = test_app(Config::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/reverse?lat=49.8974")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(error["error"], "bad_request");
}

#[tokio::test]
async fn test_metrics_reports_rows_processed() {
    let (app, _) = test_app(Config::default());

    let body = multipart_body(&[(
        "data",
        Some("upload.csv"),
        "address\n1 rue x\n2 rue y\n",
    )]);
    let response = app
        .clone()
        .oneshot(multipart_request("/search/csv", body))
        .await
        .expect("response");
    // Drain the streamed body so the upload task finishes its accounting.
    let _ = body_string(response).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let metrics: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(metrics["requests"]["uploads_total"], 1);
    assert_eq!(metrics["requests"]["rows_processed"], 2);
}

#[tokio::test]
async fn test_health_reports_sink_stats() {
    let (app, _) = test_app(Config::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    // The stub geocoder's default healthcheck is optimistic.
    assert_eq!(response.status(), StatusCode::OK);

    let payload: serde_json::Value =
        serde_json::from_str(&body_string(response).await).expect("json");
    assert_eq!(payload["status"], "healthy");
    assert!(payload["sinks"].is_array());
}
