//! Find objects by their tags.
//!
//! Tags are the only index a store has, so "is there already a backup of this
//! file?" is always answered by building an [`ObjectSearch`] and asking the
//! store to list matching objects.

use crate::StoreHandle;
use crate::error::Result;
use crate::models::ObjectId;
use crate::search::ObjectSearch;
use futures::TryStreamExt;

/// Resolves [`ObjectSearch`]es against a store.
#[derive(Clone)]
pub struct ObjectLocator {
    store: StoreHandle,
}
impl ObjectLocator {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// First matching object, in whatever order the store yields them.
    pub async fn find_one(&self, container: &str, search: &ObjectSearch) -> Result<Option<ObjectId>> {
        let query = search.to_query();
        let found = self.store.list_stream(container, query.as_ref()).try_next().await?;
        tracing::debug!(
            store = self.store.name(),
            container,
            query = %query.as_ref().map(ToString::to_string).unwrap_or_default(),
            found = ?found,
            "Located object"
        );
        Ok(found)
    }

    /// Every matching object, in the order the store yields them.
    pub async fn find_all(&self, container: &str, search: &ObjectSearch) -> Result<Vec<ObjectId>> {
        let query = search.to_query();
        let found = self.store.list(container, query.as_ref()).await?;
        tracing::debug!(
            store = self.store.name(),
            container,
            query = %query.as_ref().map(ToString::to_string).unwrap_or_default(),
            count = found.len(),
            "Located objects"
        );
        Ok(found)
    }
}
