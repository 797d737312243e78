use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

/// Request-level failures.
///
/// These reject a whole upload before any file is written. Failures that only
/// affect a single file are reported through [`crate::ingest::FailureKind`]
/// inside a successful response instead.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Body could not be parsed with the transport's encoding
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    /// Body parsed, but carried no files
    #[error("No file uploaded")]
    NoFilesProvided,

    /// Body exceeded the configured request size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Upload capacity is exhausted
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// JSON error body returned for every request-level failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MalformedRequest { .. } | Error::NoFilesProvided => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::MalformedRequest { message } => message.clone(),
            Error::NoFilesProvided => "No file uploaded".to_string(),
            Error::PayloadTooLarge { message } | Error::TooManyRequests { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::TooManyRequests { .. } | Error::PayloadTooLarge { .. } => {
                tracing::warn!("Upload rejected: {}", self);
            }
            Error::MalformedRequest { .. } | Error::NoFilesProvided => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorResponse { error: self.user_message() };
        (status, Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
