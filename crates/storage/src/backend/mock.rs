//! In-memory object store for testing.

use super::ObjectIdStream;
use crate::ObjectStore;
use crate::error::{ErrorKind, Result};
use crate::models::{ObjectId, ObjectMetadata, ObjectProperties, ObjectTags};
use crate::path::{validate as validate_path, validate_object_id};
use crate::search::TagQuery;
use async_stream::stream;
use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

struct MockObject {
    container: String,
    id: ObjectId,
    data: Vec<u8>,
    tags: ObjectTags,
    metadata: ObjectMetadata,
    created_at: OffsetDateTime,
}

/// In-memory object store for testing.
///
/// Objects are kept in insertion order behind a [`RwLock`], so listings are
/// deterministic and all trait methods can operate on `&self`.
///
/// # Examples
///
/// ```
/// use kept_storage::backend::{MockStore, ObjectStore};
/// use kept_storage::{ObjectMetadata, ObjectTags};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MockStore::default();
/// let tags = ObjectTags::new("sql", ".bak", "/db.bak", "db.bak", "db");
/// let id = store.put("sql", None, b"data", &tags, &ObjectMetadata::default()).await?;
/// assert_eq!(store.get("sql", &id).await?, b"data");
/// # Ok(())
/// # }
/// ```
pub struct MockStore {
    name: String,
    objects: RwLock<Vec<MockObject>>,
}
impl MockStore {
    /// Override an object's creation time, to exercise age-based logic.
    pub async fn backdate(&self, container: &str, id: &ObjectId, created_at: OffsetDateTime) -> Result<()> {
        let mut guard = self.objects.write().await;
        let object = Self::find_mut(&mut guard, container, id)?;
        object.created_at = created_at;
        Ok(())
    }

    /// Number of objects across all containers.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn validate(container: &str, id: &ObjectId) -> Result<()> {
        validate_path(container)?;
        validate_object_id(id.as_str())?;
        Ok(())
    }

    fn find_mut<'g>(objects: &'g mut [MockObject], container: &str, id: &ObjectId) -> Result<&'g mut MockObject> {
        Self::validate(container, id)?;
        objects
            .iter_mut()
            .find(|o| o.container == container && &o.id == id)
            .ok_or_else(|| exn::Exn::from(ErrorKind::not_found(container, id)))
    }
}
impl Default for MockStore {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            objects: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, container: &'a str, filter: Option<&'a TagQuery>) -> ObjectIdStream<'a> {
        if let Err(e) = validate_path(container) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }
        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding.
            let ids: Vec<ObjectId> = {
                let guard = self.objects.read().await;
                guard
                    .iter()
                    .filter(|o| o.container == container)
                    .filter(|o| filter.is_none_or(|q| q.matches(&o.tags)))
                    .map(|o| o.id.clone())
                    .collect()
            };
            for id in ids {
                yield Ok(id);
            }
        })
    }

    async fn get(&self, container: &str, id: &ObjectId) -> Result<Vec<u8>> {
        let mut guard = self.objects.write().await;
        Ok(Self::find_mut(&mut guard, container, id)?.data.clone())
    }

    async fn put(
        &self,
        container: &str,
        id: Option<&ObjectId>,
        data: &[u8],
        tags: &ObjectTags,
        metadata: &ObjectMetadata,
    ) -> Result<ObjectId> {
        let id = id.cloned().unwrap_or_else(ObjectId::generate);
        Self::validate(container, &id)?;
        let mut guard = self.objects.write().await;
        match guard.iter_mut().find(|o| o.container == container && o.id == id) {
            Some(existing) => {
                existing.data = data.to_vec();
                existing.tags = tags.clone();
                existing.metadata = metadata.clone();
            },
            None => guard.push(MockObject {
                container: container.to_string(),
                id: id.clone(),
                data: data.to_vec(),
                tags: tags.clone(),
                metadata: metadata.clone(),
                created_at: OffsetDateTime::now_utc(),
            }),
        }
        Ok(id)
    }

    async fn set_tags(&self, container: &str, id: &ObjectId, tags: &ObjectTags) -> Result<()> {
        let mut guard = self.objects.write().await;
        Self::find_mut(&mut guard, container, id)?.tags = tags.clone();
        Ok(())
    }

    async fn set_metadata(&self, container: &str, id: &ObjectId, metadata: &ObjectMetadata) -> Result<()> {
        let mut guard = self.objects.write().await;
        Self::find_mut(&mut guard, container, id)?.metadata = metadata.clone();
        Ok(())
    }

    async fn delete(&self, container: &str, id: &ObjectId) -> Result<()> {
        Self::validate(container, id)?;
        let mut guard = self.objects.write().await;
        let position = guard
            .iter()
            .position(|o| o.container == container && &o.id == id)
            .ok_or_else(|| exn::Exn::from(ErrorKind::not_found(container, id)))?;
        guard.remove(position);
        Ok(())
    }

    async fn properties(&self, container: &str, id: &ObjectId) -> Result<ObjectProperties> {
        let mut guard = self.objects.write().await;
        let object = Self::find_mut(&mut guard, container, id)?;
        Ok(ObjectProperties {
            tags: object.tags.clone(),
            metadata: object.metadata.clone(),
            created_at: object.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ObjectSearch;
    use time::macros::datetime;

    fn tags(path: &str) -> ObjectTags {
        ObjectTags::new("c", ".bak", path, "x.bak", "x")
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let store = MockStore::default();
        let err = store.get("c", &ObjectId::from("missing")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listing_keeps_insertion_order() {
        let store = MockStore::default();
        let mut ids = Vec::new();
        for path in ["/1", "/2", "/3"] {
            ids.push(store.put("c", None, b"", &tags(path), &ObjectMetadata::default()).await.unwrap());
        }
        assert_eq!(store.list("c", None).await.unwrap(), ids);
        let query = ObjectSearch::new().relative_path("/2").to_query();
        assert_eq!(store.list("c", query.as_ref()).await.unwrap(), vec![ids[1].clone()]);
    }

    #[tokio::test]
    async fn test_overwrite_in_place() {
        let store = MockStore::default();
        let id = store.put("c", None, b"1", &tags("/a"), &ObjectMetadata::default()).await.unwrap();
        store.backdate("c", &id, datetime!(2020-01-01 00:00 UTC)).await.unwrap();
        store.put("c", Some(&id), b"2", &tags("/b"), &ObjectMetadata::default()).await.unwrap();
        assert_eq!(store.len().await, 1);
        let properties = store.properties("c", &id).await.unwrap();
        assert_eq!(properties.created_at, datetime!(2020-01-01 00:00 UTC));
        assert_eq!(properties.tags.relative_path, "-_-b");
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MockStore::default();
        let id = store.put("c", None, b"1", &tags("/a"), &ObjectMetadata::default()).await.unwrap();
        store.delete("c", &id).await.unwrap();
        assert!(store.is_empty().await);
        let err = store.delete("c", &id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let store = MockStore::default();
        assert!(store.list("../escape", None).await.is_err());
        assert!(store.get("c", &ObjectId::from("../x")).await.is_err());
    }
}
