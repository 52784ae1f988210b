//! API error responses
//!
//! Pre-stream failures surface as a JSON body with a machine-readable
//! `error` code, a human-readable `message`, and a `timestamp`. Once a CSV
//! response has started streaming, errors can only truncate the stream.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use geobatch_common::PipelineError;

/// Error wrapper implementing the HTTP mapping for pipeline errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Pipeline(err) => match err {
                PipelineError::PayloadTooLarge { .. } | PipelineError::TooManyParts { .. } => {
                    StatusCode::PAYLOAD_TOO_LARGE
                },
                PipelineError::Decode(_)
                | PipelineError::MalformedRow { .. }
                | PipelineError::UnknownColumn(_)
                | PipelineError::MissingCoordinateColumns => StatusCode::BAD_REQUEST,
                PipelineError::GeocodeCallFailed(_) => StatusCode::BAD_GATEWAY,
                PipelineError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
                PipelineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Pipeline(err) => err.code(),
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
        (status, body).into_response()
    }
}
