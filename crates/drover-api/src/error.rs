//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use drover_core::Error as CoreError;
use drover_repo::{PackagingError, SyncError};

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
}

/// HTTP API error with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for conflicts (already exists).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an error response for a sync or packaging failure the client
    /// can act on.
    pub fn unprocessable(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }
        let body = ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { .. } => Self::not_found(err.to_string()),
            CoreError::Unauthorized(_) => Self::unauthorized(err.to_string()),
            CoreError::Validation(_) => Self::bad_request(err.to_string()),
            CoreError::Conflict(_) => Self::conflict(err.to_string()),
            CoreError::Storage(_) | CoreError::Internal(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Command { .. } | SyncError::Output { .. } => {
                Self::unprocessable("GIT_SYNC_FAILED", err.to_string())
            }
            SyncError::Timeout { .. } => Self::unprocessable("GIT_TIMEOUT", err.to_string()),
            SyncError::Spawn { .. } | SyncError::Io(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<PackagingError> for ApiError {
    fn from(err: PackagingError) -> Self {
        match err {
            PackagingError::NotSynchronized { .. } | PackagingError::MissingPath { .. } => {
                Self::unprocessable("PACKAGE_UNBUILDABLE", err.to_string())
            }
            PackagingError::InvalidPath { .. } => Self::bad_request(err.to_string()),
            PackagingError::TooLarge { .. } => {
                Self::unprocessable("PACKAGE_TOO_LARGE", err.to_string())
            }
            PackagingError::Commit(inner) => Self::from(inner),
            PackagingError::Io(_) => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_expected_statuses() {
        let err = ApiError::from(CoreError::not_found("node", uuid::Uuid::new_v4()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ApiError::from(CoreError::Conflict("dup".to_string()));
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = ApiError::from(CoreError::validation("bad"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn sync_failures_are_unprocessable_not_internal() {
        let err = ApiError::from(SyncError::Command {
            stage: "fetch",
            stderr: "could not resolve host".to_string(),
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "GIT_SYNC_FAILED");
    }

    #[test]
    fn oversized_package_has_a_dedicated_code() {
        let err = ApiError::from(PackagingError::TooLarge {
            size: 10,
            limit: 5,
        });
        assert_eq!(err.code(), "PACKAGE_TOO_LARGE");
    }
}
