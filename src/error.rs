//! Top-level error type for the `kept` binary.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Which stage of a command failed.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("unable to load configuration")]
    Config,
    #[display("unable to open object store")]
    Store,
    /// The store type in the configuration wasn't compiled into this binary.
    #[display("store type `{_0}` is not supported by this build")]
    UnsupportedStore(#[error(not(source))] &'static str),
    #[display("backup failed")]
    Backup,
    #[display("retention sweep failed")]
    Retention,
    #[display("restore failed")]
    Restore,
}
