//! Backup Error Types
//!
//! Dependency failures (storage, compression, file system) are raised into
//! this crate's [`ErrorKind`] with `or_raise`, so the error tree keeps the
//! underlying cause.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A backup error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a backup, restore or retention failure.
///
/// ### Operational Errors
/// - [`ErrorKind::BackupTimestamp`]
/// - [`ErrorKind::Watch`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Compression`]
/// - [`ErrorKind::Io`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An object store operation failed.
    #[display("object store operation failed")]
    Storage,
    /// Compressing or decompressing content failed.
    #[display("compression failed")]
    Compression,
    /// Reading a source file or writing a restored file failed.
    #[display("I/O error on {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The file name carries no parseable `YYYY_MM_DD_HHMMSS` token.
    #[display("no backup timestamp in file name `{_0}`")]
    BackupTimestamp(#[error(not(source))] String),
    /// A folder could not be watched.
    #[display("unable to watch {}", _0.display())]
    Watch(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Io(_))
    }
}
