//! Detecting files that another process still holds open for writing.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

/// Whether `path` is currently locked by someone else.
///
/// A file that doesn't exist is not locked; the dispatcher deals with it when
/// it tries to read it. Checking only needs read access, so a read-only
/// source is never mistaken for a locked one. A file that can't be opened at
/// all is treated as locked and retried later.
pub fn is_locked(path: &Path) -> bool {
    let file = match OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == IoErrorKind::NotFound => return false,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "Unable to open file, assuming locked");
            return true;
        },
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            release(&file, path);
            false
        },
        Err(err) if err.kind() == IoErrorKind::WouldBlock => true,
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => true,
        Err(err) => {
            // Some file systems don't support advisory locks at all.
            tracing::debug!(path = %path.display(), error = %err, "Unable to probe file lock");
            false
        },
    }
}

fn release(file: &File, path: &Path) {
    if let Err(err) = FileExt::unlock(file) {
        tracing::debug!(path = %path.display(), error = %err, "Unable to release probe lock");
    }
}
