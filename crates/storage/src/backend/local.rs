//! Local filesystem object store.
//!
//! Each container is a directory under the configured root. Object content
//! lives in `<container>/objects/<id>` and its tags, metadata and creation
//! time in a JSON sidecar at `<container>/properties/<id>.json`. All I/O goes
//! through `tokio::fs`.

use crate::backend::ObjectIdStream;
use crate::error::{ErrorKind, Result};
use crate::models::{ObjectId, ObjectMetadata, ObjectProperties, ObjectTags};
use crate::path::{validate as validate_path, validate_object_id};
use crate::search::TagQuery;
use crate::ObjectStore;
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};

const OBJECTS_DIR: &str = "objects";
const PROPERTIES_DIR: &str = "properties";

/// On-disk form of an object's properties.
#[derive(Serialize, Deserialize)]
struct StoredProperties {
    tags: ObjectTags,
    metadata: ObjectMetadata,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}
impl From<StoredProperties> for ObjectProperties {
    fn from(stored: StoredProperties) -> Self {
        Self {
            tags: stored.tags,
            metadata: stored.metadata,
            created_at: stored.created_at,
        }
    }
}

/// Local filesystem object store.
///
/// # Examples
///
/// ```no_run
/// use kept_storage::backend::LocalStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = LocalStore::new("local", "/var/lib/kept")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalStore {
    name: String,
    /// Directory holding one sub-directory per container
    root: PathBuf,
}
impl LocalStore {
    /// Create a new local store rooted at an absolute directory, creating it
    /// if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once at startup; not worth an async constructor.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(container)?))
    }

    fn object_path(&self, container: &str, id: &ObjectId) -> Result<PathBuf> {
        let id = validate_object_id(id.as_str())?;
        Ok(self.container_dir(container)?.join(OBJECTS_DIR).join(id))
    }

    fn properties_path(&self, container: &str, id: &ObjectId) -> Result<PathBuf> {
        let id = validate_object_id(id.as_str())?;
        Ok(self.container_dir(container)?.join(PROPERTIES_DIR).join(format!("{id}.json")))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn read_properties(&self, container: &str, id: &ObjectId) -> Result<StoredProperties> {
        let path = self.properties_path(container, id)?;
        let raw = fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::not_found(container, id),
            _ => Self::map_io_error(e, &path),
        })?;
        serde_json::from_slice(&raw).or_raise(|| ErrorKind::Corrupt(path.display().to_string()))
    }

    async fn write_properties(&self, container: &str, id: &ObjectId, properties: &StoredProperties) -> Result<()> {
        let path = self.properties_path(container, id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, parent))?;
        }
        let raw = serde_json::to_vec_pretty(properties).or_raise(|| ErrorKind::Corrupt(path.display().to_string()))?;
        Ok(fs::write(&path, raw).await.map_err(|e| Self::map_io_error(e, &path))?)
    }

    /// Listing helper, so errors can be raised with `?` instead of yielded by
    /// hand inside the stream loop.
    async fn process_entry(
        &self,
        container: &str,
        entry: DirEntry,
        filter: Option<&TagQuery>,
    ) -> Result<Option<ObjectId>> {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(|e| Self::map_io_error(e, &path))?;
        if !file_type.is_file() {
            return Ok(None);
        }
        let Some(id) = entry.file_name().to_str().map(ObjectId::from) else {
            tracing::warn!(path = %path.display(), "Skipping object with non UTF-8 identifier");
            return Ok(None);
        };
        let Some(filter) = filter else {
            return Ok(Some(id));
        };
        match self.read_properties(container, &id).await {
            Ok(properties) => Ok(filter.matches(&properties.tags).then_some(id)),
            // Content written but sidecar not yet (or no longer) present: it
            // carries no tags, so it can't match a filter.
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, container: &'a str, filter: Option<&'a TagQuery>) -> ObjectIdStream<'a> {
        let dir = match self.container_dir(container) {
            Ok(dir) => dir.join(OBJECTS_DIR),
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        Box::pin(stream! {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // A container that was never written to lists as empty, the
                // same way an unused S3 prefix does.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
                Err(err) => {
                    yield Err(exn::Exn::from(Self::map_io_error(err, &dir)));
                    return;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &dir))); break; },
                };
                match self.process_entry(container, entry, filter).await {
                    Ok(Some(id)) => yield Ok(id),
                    Ok(None) => {},
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    async fn get(&self, container: &str, id: &ObjectId) -> Result<Vec<u8>> {
        let path = self.object_path(container, id)?;
        Ok(fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::not_found(container, id),
            _ => Self::map_io_error(e, &path),
        })?)
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
        let path = self.object_path(container, &id)?;
        let created_at = match self.read_properties(container, &id).await {
            Ok(existing) => existing.created_at,
            Err(e) if matches!(&*e, ErrorKind::NotFound(_) | ErrorKind::Corrupt(_)) => OffsetDateTime::now_utc(),
            Err(e) => return Err(e),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, parent))?;
        }
        fs::write(&path, data).await.map_err(|e| Self::map_io_error(e, &path))?;
        let properties = StoredProperties {
            tags: tags.clone(),
            metadata: metadata.clone(),
            created_at,
        };
        self.write_properties(container, &id, &properties).await?;
        tracing::debug!(store = %self.name, container, id = %id, bytes = data.len(), "Wrote object");
        Ok(id)
    }

    async fn set_tags(&self, container: &str, id: &ObjectId, tags: &ObjectTags) -> Result<()> {
        let mut properties = self.read_properties(container, id).await?;
        properties.tags = tags.clone();
        self.write_properties(container, id, &properties).await
    }

    async fn set_metadata(&self, container: &str, id: &ObjectId, metadata: &ObjectMetadata) -> Result<()> {
        let mut properties = self.read_properties(container, id).await?;
        properties.metadata = metadata.clone();
        self.write_properties(container, id, &properties).await
    }

    async fn delete(&self, container: &str, id: &ObjectId) -> Result<()> {
        let path = self.object_path(container, id)?;
        fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::not_found(container, id),
            _ => Self::map_io_error(e, &path),
        })?;
        let properties = self.properties_path(container, id)?;
        match fs::remove_file(&properties).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(exn::Exn::from(Self::map_io_error(e, &properties))),
        }
    }

    async fn properties(&self, container: &str, id: &ObjectId) -> Result<ObjectProperties> {
        Ok(self.read_properties(container, id).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ObjectSearch;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new("local", temp_dir.path()).unwrap();
        (temp_dir, store)
    }

    fn tags(path: &str, name: &str) -> ObjectTags {
        ObjectTags::new("sql", ".bak", path, name, name)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalStore::new("name", temp_dir.path()).is_ok());
        assert!(LocalStore::new("name", "relative/path").is_err());
        assert!(LocalStore::new("name", "./relative").is_err());
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_dir, store) = store();
        let metadata = ObjectMetadata {
            compressed: true,
            file_name: Some("db.bak".to_string()),
            ..Default::default()
        };
        let id = store.put("sql", None, b"payload", &tags("/db.bak", "db.bak"), &metadata).await.unwrap();
        assert_eq!(store.get("sql", &id).await.unwrap(), b"payload");
        let properties = store.properties("sql", &id).await.unwrap();
        assert_eq!(properties.metadata, metadata);
        assert_eq!(properties.tags.relative_path, "-_-db.bak");
    }

    #[tokio::test]
    async fn test_overwrite_keeps_creation_time() {
        let (_dir, store) = store();
        let id = store.put("sql", None, b"one", &tags("/a.bak", "a.bak"), &ObjectMetadata::default()).await.unwrap();
        let created = store.properties("sql", &id).await.unwrap().created_at;
        let same = store.put("sql", Some(&id), b"two", &tags("/a.bak", "a.bak"), &ObjectMetadata::default()).await.unwrap();
        assert_eq!(same, id);
        assert_eq!(store.get("sql", &id).await.unwrap(), b"two");
        assert_eq!(store.properties("sql", &id).await.unwrap().created_at, created);
        assert_eq!(store.list("sql", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let (_dir, store) = store();
        store.put("sql", None, b"a", &tags("/a.bak", "a.bak"), &ObjectMetadata::default()).await.unwrap();
        let b = store.put("sql", None, b"b", &tags("/x/b.bak", "b.bak"), &ObjectMetadata::default()).await.unwrap();
        store.put("other", None, b"c", &tags("/x/b.bak", "b.bak"), &ObjectMetadata::default()).await.unwrap();
        assert_eq!(store.list("sql", None).await.unwrap().len(), 2);
        let query = ObjectSearch::new().relative_path("/x/b.bak").to_query();
        assert_eq!(store.list("sql", query.as_ref()).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_list_missing_container_is_empty() {
        let (_dir, store) = store();
        assert!(store.list("never-written", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_tags_and_metadata() {
        let (_dir, store) = store();
        let id = store.put("sql", None, b"a", &tags("/a.bak", "a.bak"), &ObjectMetadata::default()).await.unwrap();
        store.set_tags("sql", &id, &tags("/b.bak", "b.bak")).await.unwrap();
        let metadata = ObjectMetadata {
            relative_path: Some("/b.bak".to_string()),
            ..Default::default()
        };
        store.set_metadata("sql", &id, &metadata).await.unwrap();
        let properties = store.properties("sql", &id).await.unwrap();
        assert_eq!(properties.tags.file_name, "b.bak");
        assert_eq!(properties.metadata, metadata);
        assert_eq!(store.get("sql", &id).await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, store) = store();
        let id = store.put("sql", None, b"a", &tags("/a.bak", "a.bak"), &ObjectMetadata::default()).await.unwrap();
        store.delete("sql", &id).await.unwrap();
        assert!(store.list("sql", None).await.unwrap().is_empty());
        let err = store.delete("sql", &id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = store.properties("sql", &id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_dir, store) = store();
        let escape = ObjectId::from("../../etc/passwd");
        assert!(store.get("sql", &escape).await.is_err());
        assert!(store.get("../etc", &ObjectId::from("passwd")).await.is_err());
        assert!(store.list("..", None).await.is_err());
    }
}
