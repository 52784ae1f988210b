//! Pipeline data model

use serde::Serialize;
use std::sync::Arc;

/// Direction of a geocoding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeocodeMode {
    #[default]
    Forward,
    Reverse,
}

impl GeocodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodeMode::Forward => "forward",
            GeocodeMode::Reverse => "reverse",
        }
    }
}

/// One decoded data row. Immutable once produced by the decoder.
///
/// `sequence` values are strictly increasing and contiguous from 0; they
/// establish the row's position in the original file and are the key that
/// re-associates outcomes with rows after concurrent execution.
#[derive(Debug, Clone)]
pub struct RowRecord {
    sequence: u64,
    header: Arc<[String]>,
    fields: Vec<String>,
}

impl RowRecord {
    pub fn new(sequence: u64, header: Arc<[String]>, fields: Vec<String>) -> Self {
        Self {
            sequence,
            header,
            fields,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Field value by header index.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

/// What the worker should do for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    /// Forward geocode a non-empty query string.
    Forward { query: String },
    /// Reverse geocode a parsed coordinate pair.
    Reverse { lat: f64, lon: f64 },
    /// All query columns were empty; short-circuit to `NotFound` without
    /// calling the engine.
    EmptyQuery,
    /// Coordinate text did not parse; short-circuit to `Error` without
    /// calling the engine.
    InvalidCoordinates { detail: String },
}

/// One unit of geocoding work, owned exclusively by the worker executing it.
#[derive(Debug, Clone)]
pub struct GeocodeTask {
    pub sequence: u64,
    pub payload: TaskPayload,
    pub bias_center: Option<(f64, f64)>,
    pub filters: Vec<(String, String)>,
}

/// Result status of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Found,
    NotFound,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Found => "found",
            OutcomeStatus::NotFound => "not_found",
            OutcomeStatus::Error => "error",
        }
    }
}

/// Best-ranked candidate returned by the geocoding engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Candidate {
    pub label: String,
    pub score: f64,
    pub lon: f64,
    pub lat: f64,
    pub postcode: String,
    pub city: String,
    pub context: String,
}

/// Result of one GeocodeTask, matched back to its row by `sequence`.
#[derive(Debug, Clone)]
pub struct GeocodeOutcome {
    pub sequence: u64,
    pub status: OutcomeStatus,
    pub best_candidate: Option<Candidate>,
    pub error_detail: Option<String>,
}

impl GeocodeOutcome {
    pub fn found(sequence: u64, candidate: Candidate) -> Self {
        Self {
            sequence,
            status: OutcomeStatus::Found,
            best_candidate: Some(candidate),
            error_detail: None,
        }
    }

    pub fn not_found(sequence: u64) -> Self {
        Self {
            sequence,
            status: OutcomeStatus::NotFound,
            best_candidate: None,
            error_detail: None,
        }
    }

    pub fn error(sequence: u64, detail: impl Into<String>) -> Self {
        Self {
            sequence,
            status: OutcomeStatus::Error,
            best_candidate: None,
            error_detail: Some(detail.into()),
        }
    }
}
