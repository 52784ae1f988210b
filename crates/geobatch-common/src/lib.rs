//! Shared foundations for the geobatch workspace.
//!
//! This crate carries the error taxonomy used across the ingestion pipeline
//! and the logging configuration shared by every binary. It deliberately has
//! no knowledge of HTTP, CSV, or telemetry transports.

pub mod error;
pub mod logging;

pub use error::{PipelineError, Result};
