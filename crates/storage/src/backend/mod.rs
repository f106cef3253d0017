//! Object store trait and implementations.
//!
//! This module defines the `ObjectStore` trait, the one capability the backup,
//! restore and retention pipelines need from a store: put/get/delete objects
//! in named containers, read and replace their tags and metadata, and list
//! them (optionally filtered by a [`TagQuery`]).
//!
//! Implementations are composed, never inherited: each backend implements the
//! trait once and is injected as a [`StoreHandle`](crate::StoreHandle).

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod ro;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalStore;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockStore;
pub use self::ro::ReadOnlyStore;
#[cfg(feature = "s3")]
pub use self::s3::S3Store;
use crate::error::Result;
use crate::models::{ObjectId, ObjectMetadata, ObjectProperties, ObjectTags};
use crate::search::TagQuery;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

pub(crate) type ObjectIdStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectId>> + Send + 'a>>;

/// Unified interface for object stores.
///
/// All operations are asynchronous to efficiently handle network stores.
/// Objects live in named containers and are addressed by an opaque
/// [`ObjectId`]; there is no index besides the tags attached to each object.
///
/// # Examples
///
/// ```
/// use kept_storage::{ObjectStore, error::Result, search::ObjectSearch};
///
/// async fn count_backups(store: &dyn ObjectStore, container: &str) -> Result<usize> {
///     let query = ObjectSearch::new().file_extension(".bak").to_query();
///     Ok(store.list(container, query.as_ref()).await?.len())
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the configured store (used for logging only).
    fn name(&self) -> &str;

    /// List object ids in a container, optionally filtered by tags.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, container: &str, filter: Option<&TagQuery>) -> Result<Vec<ObjectId>> {
        self.list_stream(container, filter).try_collect().await
    }

    /// Stream object ids in a container, optionally filtered by tags.
    ///
    /// # Notes
    /// - Order is whatever the store yields (provider order) and is not
    ///   guaranteed to be stable between calls.
    /// - A container that doesn't exist yet lists as empty, not as an error.
    fn list_stream<'a>(&'a self, container: &'a str, filter: Option<&'a TagQuery>) -> ObjectIdStream<'a>;

    /// Read an object's (stored, possibly compressed) content.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn get(&self, container: &str, id: &ObjectId) -> Result<Vec<u8>>;

    /// Write an object with its full tag and metadata sets.
    ///
    /// With `id = None` the store assigns a fresh identifier. With an existing
    /// id the content, tags and metadata are replaced, while the store-assigned
    /// creation time is kept. Returns the id written to.
    async fn put(
        &self,
        container: &str,
        id: Option<&ObjectId>,
        data: &[u8],
        tags: &ObjectTags,
        metadata: &ObjectMetadata,
    ) -> Result<ObjectId>;

    /// Replace an object's tags without touching its content.
    async fn set_tags(&self, container: &str, id: &ObjectId, tags: &ObjectTags) -> Result<()>;

    /// Replace an object's metadata without touching its content.
    async fn set_metadata(&self, container: &str, id: &ObjectId, metadata: &ObjectMetadata) -> Result<()>;

    /// Delete an object.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn delete(&self, container: &str, id: &ObjectId) -> Result<()>;

    /// Read an object's tags, metadata and creation time.
    async fn properties(&self, container: &str, id: &ObjectId) -> Result<ObjectProperties>;
}
