//! Filtered restore back into a folder tree.

use crate::error::{ErrorKind, Result};
use crate::restore::download;
use exn::ResultExt;
use kept_config::{BasicRestoreFilter, BasicRestoreJob};
use kept_storage::{ObjectLocator, ObjectSearch, StoreHandle};
use std::path::{Component, Path, PathBuf};

fn search_for(filter: &BasicRestoreFilter) -> ObjectSearch {
    ObjectSearch {
        file_extension: filter.file_extension.clone(),
        relative_path: filter.relative_path.clone(),
        file_name: filter.file_name.clone(),
    }
}

/// Where an object recorded at `relative_path` lands below `root`, or `None`
/// when the recorded path would leave it.
fn target_path(root: &Path, relative_path: &str) -> Option<PathBuf> {
    let relative = Path::new(relative_path.trim_start_matches(['/', '\\']));
    let mut target = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => target.push(segment),
            Component::CurDir => {},
            _ => return None,
        }
    }
    (target != root).then_some(target)
}

/// Restores every object matching a job's filter to
/// `<restore_path><relative_path>`.
pub struct BasicRestore {
    locator: ObjectLocator,
}
impl BasicRestore {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            locator: ObjectLocator::new(store),
        }
    }

    /// Returns the number of objects restored.
    pub async fn restore(&self, job: &BasicRestoreJob) -> Result<usize> {
        let store = self.locator.store();
        let container = job.container.as_str();
        let ids = self.locator.find_all(container, &search_for(&job.filter)).await.or_raise(|| ErrorKind::Storage)?;
        tracing::info!(container, count = ids.len(), "Found objects to restore");

        let mut restored = 0;
        for id in ids {
            let metadata = store.properties(container, &id).await.or_raise(|| ErrorKind::Storage)?.metadata;
            let Some(target) = metadata.relative_path.as_deref().and_then(|path| target_path(&job.restore_path, path))
            else {
                tracing::warn!(
                    container,
                    object = %id,
                    relative_path = ?metadata.relative_path,
                    "Skipping object without a usable relative path"
                );
                continue;
            };
            download(store, container, &id, metadata.compressed, &target).await?;
            restored += 1;
        }
        Ok(restored)
    }

    pub async fn restore_all(&self, jobs: &[BasicRestoreJob]) -> Result<usize> {
        let mut restored = 0;
        for job in jobs {
            restored += self.restore(job).await?;
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kept_compress::Compression;
    use kept_storage::backend::MockStore;
    use kept_storage::{ObjectMetadata, ObjectStore, ObjectTags};
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    #[case("/a/b.bak", Some("/restore/a/b.bak"))]
    #[case("a\\b.bak", Some("/restore/a\\b.bak"))]
    #[case("/./b.bak", Some("/restore/b.bak"))]
    #[case("/../b.bak", None)]
    #[case("/", None)]
    fn test_target_path(#[case] relative: &str, #[case] expected: Option<&str>) {
        assert_eq!(target_path(Path::new("/restore"), relative), expected.map(PathBuf::from));
    }

    async fn seed(store: &MockStore, relative_path: Option<&str>, ext: &str, content: &[u8], compress: bool) {
        let path = relative_path.unwrap_or("/unknown");
        let name = path.rsplit('/').next().unwrap_or(path);
        let tags = ObjectTags::new("files", ext, path, name, name);
        let metadata = ObjectMetadata {
            compressed: compress,
            relative_path: relative_path.map(str::to_string),
            ..Default::default()
        };
        let content = Compression::from_flag(compress).compress(content).unwrap();
        store.put("files", None, &content, &tags, &metadata).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_filtered_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        seed(&store, Some("/nightly/a.bak"), ".bak", b"plain", false).await;
        seed(&store, Some("/nightly/deep/b.bak"), ".bak", b"gzipped", true).await;
        seed(&store, Some("/c.trn"), ".trn", b"log", false).await;
        seed(&store, None, ".bak", b"lost", false).await;

        let job = BasicRestoreJob {
            container: "files".to_string(),
            restore_path: dir.path().to_path_buf(),
            filter: BasicRestoreFilter {
                file_extension: Some(".bak".to_string()),
                ..Default::default()
            },
        };
        let restored = BasicRestore::new(store).restore_all(&[job]).await.unwrap();
        assert_eq!(restored, 2);
        assert_eq!(std::fs::read(dir.path().join("nightly/a.bak")).unwrap(), b"plain");
        assert_eq!(std::fs::read(dir.path().join("nightly/deep/b.bak")).unwrap(), b"gzipped");
        assert!(!dir.path().join("c.trn").exists());
    }
}
