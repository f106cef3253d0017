//! Read-only object store.
//!
//! Wraps another store and prevents write operations from executing, while
//! still indicating success on return. Used for dry runs.

use async_trait::async_trait;

use crate::backend::ObjectIdStream;
use crate::error::Result;
use crate::models::{ObjectId, ObjectMetadata, ObjectProperties, ObjectTags};
use crate::search::TagQuery;
use crate::{ObjectStore, StoreHandle};

/// Read-only object store.
///
/// Reads are forwarded to the inner store; writes are dropped and logged as
/// an [`info event`](tracing::Event).
#[derive(Clone)]
pub struct ReadOnlyStore {
    inner: StoreHandle,
}
impl ReadOnlyStore {
    pub fn new(inner: StoreHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObjectStore for ReadOnlyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, container: &'a str, filter: Option<&'a TagQuery>) -> ObjectIdStream<'a> {
        self.inner.list_stream(container, filter)
    }

    async fn get(&self, container: &str, id: &ObjectId) -> Result<Vec<u8>> {
        self.inner.get(container, id).await
    }

    async fn put(
        &self,
        container: &str,
        id: Option<&ObjectId>,
        data: &[u8],
        tags: &ObjectTags,
        _metadata: &ObjectMetadata,
    ) -> Result<ObjectId> {
        let id = id.cloned().unwrap_or_else(ObjectId::generate);
        tracing::info!(
            container,
            id = %id,
            relative_path = %tags.relative_path,
            bytes = data.len(),
            "Skipping put during read-only mode"
        );
        Ok(id)
    }

    async fn set_tags(&self, container: &str, id: &ObjectId, _tags: &ObjectTags) -> Result<()> {
        tracing::info!(container, id = %id, "Skipping tag update during read-only mode");
        Ok(())
    }

    async fn set_metadata(&self, container: &str, id: &ObjectId, _metadata: &ObjectMetadata) -> Result<()> {
        tracing::info!(container, id = %id, "Skipping metadata update during read-only mode");
        Ok(())
    }

    async fn delete(&self, container: &str, id: &ObjectId) -> Result<()> {
        tracing::info!(container, id = %id, "Skipping delete during read-only mode");
        Ok(())
    }

    async fn properties(&self, container: &str, id: &ObjectId) -> Result<ObjectProperties> {
        self.inner.properties(container, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_writes_are_dropped() {
        let inner = Arc::new(MockStore::default());
        let tags = ObjectTags::new("c", ".bak", "/a.bak", "a.bak", "a");
        let id = inner.put("c", None, b"data", &tags, &ObjectMetadata::default()).await.unwrap();
        let store = ReadOnlyStore::new(inner.clone());

        store.delete("c", &id).await.unwrap();
        store.put("c", None, b"more", &tags, &ObjectMetadata::default()).await.unwrap();
        store.set_tags("c", &id, &ObjectTags::default()).await.unwrap();

        assert_eq!(inner.len().await, 1);
        assert_eq!(store.get("c", &id).await.unwrap(), b"data");
        assert_eq!(store.properties("c", &id).await.unwrap().tags, tags);
        assert_eq!(store.list("c", None).await.unwrap(), vec![id]);
    }
}
