//! Write-time compression for stored objects.
//!
//! Objects are either stored as-is or gzip-compressed in memory before upload.
//! The choice is recorded on the object itself (the `compressed` metadata
//! flag), so readers map that flag back to a [`Compression`] with
//! [`Compression::from_flag`] and apply the exact inverse.
//!
//! Gzip uses the highest available level; backups are written once and kept
//! for a long time, so storage space wins over speed.

pub mod error;
mod ops;
mod util;

/// A supported compression format.
///
/// Defaults to [`None`](Self::None) (uncompressed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Gzip compression (.gz)
    Gzip,
}

impl Compression {
    /// Map a stored `compressed` flag onto the format used at write time.
    #[inline]
    #[must_use]
    pub fn from_flag(compressed: bool) -> Self {
        match compressed {
            true => Compression::Gzip,
            false => Compression::None,
        }
    }

    /// The value of the `compressed` flag recorded for this format.
    #[inline]
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Compression::None)
    }
}
