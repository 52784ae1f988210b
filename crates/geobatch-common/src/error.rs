//! Error types for the geobatch pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error taxonomy for the ingestion pipeline.
///
/// Pre-decode errors (`PayloadTooLarge`, `TooManyParts`) and mapping errors
/// (`UnknownColumn`, `MissingCoordinateColumns`) abort before any output row
/// is emitted. `DecodeError` and `MalformedRow` abort the remaining stream
/// mid-flight; rows already flushed stay delivered. `GeocodeCallFailed` is
/// recovered per row and never aborts a batch on its own.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("payload too large: {actual} bytes exceeds limit of {limit}")]
    PayloadTooLarge { actual: u64, limit: u64 },

    #[error("too many multipart parts: {actual} exceeds limit of {limit}")]
    TooManyParts { actual: usize, limit: usize },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("malformed row {sequence}: expected {expected} fields, got {actual}")]
    MalformedRow {
        sequence: u64,
        expected: usize,
        actual: usize,
    },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("reverse geocoding requires resolvable lat and lon columns")]
    MissingCoordinateColumns,

    #[error("geocoder call failed: {0}")]
    GeocodeCallFailed(String),

    #[error("pipeline cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Machine-readable code used in structured error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::TooManyParts { .. } => "too_many_parts",
            Self::Decode(_) => "decode_error",
            Self::MalformedRow { .. } => "malformed_row",
            Self::UnknownColumn(_) => "unknown_column",
            Self::MissingCoordinateColumns => "missing_coordinate_columns",
            Self::GeocodeCallFailed(_) => "geocode_call_failed",
            Self::Cancelled(_) => "pipeline_cancelled",
            Self::Io(_) => "io_error",
        }
    }

    /// Wrap this error so it can travel through an `std::io::Error`, e.g.
    /// out of an `AsyncRead` adapter.
    pub fn into_io(self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, self)
    }

    /// Recover a typed pipeline error smuggled through [`Self::into_io`],
    /// falling back to plain `Io` otherwise.
    pub fn from_io(err: std::io::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(inner) => inner,
            Err(err) => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = PipelineError::PayloadTooLarge {
            actual: 10,
            limit: 5,
        };
        assert_eq!(err.code(), "payload_too_large");
        assert_eq!(PipelineError::MissingCoordinateColumns.code(), "missing_coordinate_columns");
    }

    #[test]
    fn test_io_round_trip_preserves_variant() {
        let err = PipelineError::PayloadTooLarge {
            actual: 100,
            limit: 50,
        };
        let io = err.into_io();
        match PipelineError::from_io(io) {
            PipelineError::PayloadTooLarge { actual, limit } => {
                assert_eq!(actual, 100);
                assert_eq!(limit, 50);
            },
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_plain_io_error_maps_to_io_variant() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(PipelineError::from_io(io), PipelineError::Io(_)));
    }
}
