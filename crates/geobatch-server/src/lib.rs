//! Geobatch Server
//!
//! HTTP gateway in front of the geocoding engine:
//!
//! - **Batch endpoints**: `POST /search/csv` and `POST /reverse/csv` accept
//!   multipart CSV uploads of unbounded size, stream them through the
//!   ingestion pipeline, and stream annotated CSV back.
//! - **Single-shot endpoints**: `GET /search` and `GET /reverse` proxy one
//!   query to the engine.
//! - **Operational endpoints**: `/health` and `/metrics`.
//!
//! Every request is wrapped in a request-level telemetry event; batch
//! uploads additionally get a job event and one row event per geocoded row,
//! all correlated by a shared trace context and fanned out to the
//! configured exporter backends.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;
