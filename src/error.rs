//! Error types for the Sheets Sync server
//!
//! Per-source failures (fetch, write, checkpoint) live next to the code that
//! produces them and never abort a cycle. This module holds the two ends of
//! the range: failures that stop the process before scheduling starts, and
//! failures surfaced over HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::sync::StoreError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Startup failure; the process exits non-zero
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to build gateway: {0}")]
    GatewayInit(String),

    #[error("No source reachable ({attempted} attempted)")]
    GatewayUnreachable { attempted: usize },
}

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Checkpoint store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            AppError::NotFound(e.to_string())
        } else {
            AppError::Store(e)
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Store(e) => {
                tracing::error!("Checkpoint store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    "Checkpoint store error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
