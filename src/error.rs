//! # Error Handling
//!
//! Pipeline stages return [`IngestError`]; it is translated into an HTTP problem+json
//! [`ApiError`] only at the handler boundary.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable description of what went wrong
    pub detail: Box<str>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and detail
    pub fn new<S: Into<String>>(status: StatusCode, code: S, detail: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            detail: detail.into().into_boxed_str(),
            trace_id: telemetry::current_trace_id().map(String::into_boxed_str),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Failure taxonomy shared by every ingestion stage.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed request shape: wrong file extension, bad table name, batch size out of range.
    #[error("{0}")]
    InvalidInput(String),
    /// Content parsed structurally but failed decoding or type coercion.
    #[error("Data validation error: {0}")]
    Validation(String),
    /// Missing or invalid credential.
    #[error("{0}")]
    Unauthenticated(String),
    /// The server has no secret to check credentials against.
    #[error("{0}")]
    Misconfigured(String),
    /// Warehouse failure or anything else unexpected; the message is passed through.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status used when this error reaches the transport boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::InvalidInput(_) | IngestError::Validation(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthenticated(_) => StatusCode::FORBIDDEN,
            IngestError::Misconfigured(_) | IngestError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error code string (SCREAMING_SNAKE_CASE).
    pub fn error_code(&self) -> &'static str {
        match self {
            IngestError::InvalidInput(_) => "INVALID_INPUT",
            IngestError::Validation(_) => "VALIDATION_FAILED",
            IngestError::Unauthenticated(_) => "FORBIDDEN",
            IngestError::Misconfigured(_) => "MISCONFIGURED",
            IngestError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        match &error {
            IngestError::Internal(_) | IngestError::Misconfigured(_) => {
                tracing::error!(error = %error, "Request failed");
            }
            _ => tracing::debug!(error = %error, "Request rejected"),
        }

        let detail = error.to_string();
        ApiError::new(error.status_code(), error.error_code(), detail.as_str())
    }
}

impl From<csv::Error> for IngestError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(_) => IngestError::internal(error.to_string()),
            _ => IngestError::validation(error.to_string()),
        }
    }
}

impl From<JsonRejection> for IngestError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        IngestError::InvalidInput(message)
    }
}

impl From<MultipartRejection> for IngestError {
    fn from(rejection: MultipartRejection) -> Self {
        IngestError::InvalidInput(format!("Invalid multipart request: {}", rejection.body_text()))
    }
}

impl From<MultipartError> for IngestError {
    fn from(error: MultipartError) -> Self {
        IngestError::InvalidInput(format!("Invalid multipart request: {}", error.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        IngestError::from(rejection).into()
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        IngestError::from(rejection).into()
    }
}
