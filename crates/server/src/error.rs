// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tomcat_core::CatalogueError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Catalogue(err) => match err {
                CatalogueError::Validation(msg) => {
                    tracing::warn!(message = %msg, "Validation failed");
                    (
                        StatusCode::BAD_REQUEST,
                        ErrorResponse::with_details("Validation error", msg.clone()),
                    )
                }
                CatalogueError::SessionNotFound { name } => {
                    tracing::warn!(session = %name, "Session not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Session not found", format!("Session: {name}")),
                    )
                }
                CatalogueError::EntryNotFound { session, tomo_name } => {
                    tracing::warn!(session = %session, tomo = %tomo_name, "Tomogram not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Tomogram not found", err.to_string()),
                    )
                }
                CatalogueError::SessionExists { name } => {
                    tracing::warn!(session = %name, "Session already exists");
                    (
                        StatusCode::CONFLICT,
                        ErrorResponse::with_details("Conflict", err.to_string()),
                    )
                }
                CatalogueError::Persistence { path, source } => {
                    tracing::error!(path = %path.display(), error = %source, "Persistence failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Storage error", source.to_string()),
                    )
                }
            },
            ApiError::NotFound(what) => {
                tracing::warn!(what = %what, "Not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Not found", what.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
