use crate::{services::catalog_service::CatalogError, sync::ScanError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: a status code plus the message returned to the client.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::BucketNotFound(_) | CatalogError::JobNotFound(_) => {
                AppError::not_found(err.to_string())
            }
            CatalogError::Sqlx(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::SweepInProgress | ScanError::BucketBusy(_) => {
                AppError::conflict(err.to_string())
            }
            ScanError::NoTargetBucket => AppError::new(StatusCode::BAD_REQUEST, err.to_string()),
            ScanError::Catalog(inner) => inner.into(),
            ScanError::Inaccessible { .. }
            | ScanError::Listing { .. }
            | ScanError::Discovery(_) => AppError::new(StatusCode::BAD_GATEWAY, err.to_string()),
            ScanError::Cancelled => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
        }
    }
}
