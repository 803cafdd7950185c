//! Error types and result aliases for drover.
//!
//! This module defines the shared error taxonomy used across all drover
//! components. Errors are structured for programmatic handling: the HTTP
//! layer maps each variant to a status code without string matching.

use std::fmt;

/// The result type used throughout drover.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in drover operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The type of entity that was not found.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Authentication failed (bad or missing credential).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid input was provided.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation conflicts with existing state (e.g. duplicate name).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A store operation failed.
    #[error("store error: {0}")]
    Storage(String),

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a not-found error for the given entity type and id.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a validation error with the given message.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an unauthorized error with the given message.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }
}
