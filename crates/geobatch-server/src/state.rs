//! Shared application state

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use geobatch_pipeline::Geocoder;
use geobatch_telemetry::TelemetryFanout;

use crate::config::Config;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub geocoder: Arc<dyn Geocoder>,
    pub fanout: Arc<TelemetryFanout>,
    pub config: Arc<Config>,
    pub stats: Arc<RequestStats>,
}

impl AppState {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        fanout: Arc<TelemetryFanout>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            geocoder,
            fanout,
            config,
            stats: Arc::new(RequestStats::default()),
        }
    }
}

/// Process-wide request counters exposed by `/metrics`.
#[derive(Debug, Default)]
pub struct RequestStats {
    requests_total: AtomicU64,
    uploads_total: AtomicU64,
    rows_processed: AtomicU64,
    errors_total: AtomicU64,
}

/// Point-in-time view of [`RequestStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub uploads_total: u64,
    pub rows_processed: u64,
    pub errors_total: u64,
}

impl RequestStats {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self) {
        self.uploads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows(&self, count: u64) {
        self.rows_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            uploads_total: self.uploads_total.load(Ordering::Relaxed),
            rows_processed: self.rows_processed.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}
