//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Object does not exist in the container (`container/id`)
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Network-related error (S3 connections, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Container name contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Object identifiers must be a single, plain path segment
    #[display("invalid object id: {_0}")]
    InvalidObjectId(#[error(not(source))] String),
    /// Tag query string does not follow the `Field = 'value' && ...` grammar
    #[display("invalid tag query: {_0}")]
    InvalidQuery(#[error(not(source))] String),
    /// Stored tags/metadata could not be decoded
    #[display("corrupt object properties: {_0}")]
    Corrupt(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }

    pub(crate) fn not_found(container: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{container}/{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_container_and_object() {
        let err = ErrorKind::not_found("backups", "abc-123");
        assert_eq!(err.to_string(), "object not found: backups/abc-123");
        assert!(!err.is_retryable());
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(ErrorKind::Network("timeout".to_string()).is_retryable());
        assert!(!ErrorKind::InvalidQuery("x".to_string()).is_retryable());
    }
}
