//! Age-based deletion of backed up objects.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use kept_config::RetentionConfig;
use kept_storage::{ObjectLocator, ObjectProperties, ObjectSearch, StoreHandle};
use std::ops::AddAssign;
use time::{Duration, OffsetDateTime};

/// What a sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
}
impl AddAssign for SweepReport {
    fn add_assign(&mut self, rhs: Self) {
        self.examined += rhs.examined;
        self.deleted += rhs.deleted;
    }
}

/// Whether an object is old enough to delete.
///
/// The source file's recorded last write time wins when it is known and
/// newer than the threshold; otherwise the store's own creation time decides.
/// Both comparisons are strict.
pub fn is_expired(properties: &ObjectProperties, delete_after: OffsetDateTime) -> bool {
    if properties.metadata.last_write_time().is_some_and(|last_write| last_write > delete_after) {
        return false;
    }
    properties.created_at < delete_after
}

pub struct RetentionSweeper {
    locator: ObjectLocator,
}
impl RetentionSweeper {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            locator: ObjectLocator::new(store),
        }
    }

    pub async fn sweep(&self, folders: &[RetentionConfig]) -> Result<SweepReport> {
        self.sweep_at(folders, OffsetDateTime::now_utc()).await
    }

    /// Sweep every configured container as if the current time were `now`.
    pub async fn sweep_at(&self, folders: &[RetentionConfig], now: OffsetDateTime) -> Result<SweepReport> {
        let mut total = SweepReport::default();
        for folder in folders {
            total += self.sweep_folder(folder, now).await?;
        }
        Ok(total)
    }

    async fn sweep_folder(&self, folder: &RetentionConfig, now: OffsetDateTime) -> Result<SweepReport> {
        let store = self.locator.store();
        let container = folder.container.as_str();
        let Some(delete_after) = now.checked_sub(Duration::days(i64::from(folder.retention_days))) else {
            tracing::info!(
                container,
                retention_days = folder.retention_days,
                "Retention period reaches past the earliest representable date, nothing expires"
            );
            return Ok(SweepReport::default());
        };
        let search = match &folder.file_extension {
            Some(extension) => ObjectSearch::new().file_extension(extension),
            None => ObjectSearch::new(),
        };
        let ids = self.locator.find_all(container, &search).await.or_raise(|| ErrorKind::Storage)?;

        let mut report = SweepReport::default();
        for id in ids {
            report.examined += 1;
            let properties = store.properties(container, &id).await.or_raise(|| ErrorKind::Storage)?;
            if !is_expired(&properties, delete_after) {
                continue;
            }
            tracing::debug!(
                container,
                object = %id,
                relative_path = ?properties.metadata.relative_path,
                created_at = %properties.created_at,
                "Deleting expired object"
            );
            store.delete(container, &id).await.or_raise(|| ErrorKind::Storage)?;
            report.deleted += 1;
        }
        tracing::info!(
            container,
            retention_days = folder.retention_days,
            examined = report.examined,
            deleted = report.deleted,
            "Retention sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeEvent, ChangeKind};
    use crate::dispatch::{ChangeProcessor, Outcome};
    use crate::testing::folder;
    use kept_storage::backend::MockStore;
    use kept_storage::models::format_timestamp;
    use kept_storage::{ObjectId, ObjectMetadata, ObjectStore, ObjectTags};
    use std::sync::Arc;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-30 12:00:00 UTC);

    fn config(extension: Option<&str>) -> RetentionConfig {
        RetentionConfig {
            container: "sql".to_string(),
            file_extension: extension.map(str::to_string),
            retention_days: 30,
        }
    }

    /// An object whose source was last written `last_write_days` and stored
    /// `created_days` before `NOW`.
    async fn seed(store: &MockStore, ext: &str, last_write_days: Option<i64>, created_days: i64) -> ObjectId {
        let tags = ObjectTags::new("sql", ext, "/db", "db", "db");
        let metadata = ObjectMetadata {
            last_write_time_utc: last_write_days.map(|days| format_timestamp(NOW - Duration::days(days))),
            ..Default::default()
        };
        let id = store.put("sql", None, b"data", &tags, &metadata).await.unwrap();
        store.backdate("sql", &id, NOW - Duration::days(created_days)).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_boundaries() {
        let store = Arc::new(MockStore::default());
        let exactly = seed(&store, ".bak", Some(30), 30).await;
        let older = seed(&store, ".bak", Some(31), 31).await;
        let recent_write = seed(&store, ".bak", Some(29), 60).await;
        let older_but_recent_copy = seed(&store, ".bak", Some(31), 29).await;
        let unknown_and_old = seed(&store, ".bak", None, 31).await;
        let unknown_and_exactly = seed(&store, ".bak", None, 30).await;

        let sweeper = RetentionSweeper::new(store.clone());
        let report = sweeper.sweep_at(&[config(None)], NOW).await.unwrap();
        assert_eq!(report, SweepReport { examined: 6, deleted: 2 });

        let remaining = store.list("sql", None).await.unwrap();
        assert_eq!(remaining, vec![exactly, recent_write, older_but_recent_copy, unknown_and_exactly]);
        assert!(!remaining.contains(&older));
        assert!(!remaining.contains(&unknown_and_old));
    }

    #[tokio::test]
    async fn test_only_matching_extension_is_swept() {
        let store = Arc::new(MockStore::default());
        seed(&store, ".bak", Some(90), 90).await;
        let log = seed(&store, ".trn", Some(90), 90).await;
        let sweeper = RetentionSweeper::new(store.clone());
        let report = sweeper.sweep_at(&[config(Some(".bak"))], NOW).await.unwrap();
        assert_eq!(report, SweepReport { examined: 1, deleted: 1 });
        assert_eq!(store.list("sql", None).await.unwrap(), vec![log]);
    }

    #[tokio::test]
    async fn test_upper_case_extension_is_swept() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::default());
        let path = dir.path().join("payroll_backup_2024_01_02_030405.BAK");
        std::fs::write(&path, b"data").unwrap();
        let change = ChangeEvent::new(folder(dir.path()), Some(ChangeKind::Created), &path);
        let Outcome::Created(id) = ChangeProcessor::new(store.clone()).process(&change).await.unwrap() else {
            panic!("expected a new object");
        };
        assert_eq!(store.properties("sql", &id).await.unwrap().tags.file_extension, ".bak");

        // Make the stored copy and its recorded write time both look old.
        let mut metadata = store.properties("sql", &id).await.unwrap().metadata;
        metadata.last_write_time_utc = Some(format_timestamp(NOW - Duration::days(400)));
        store.set_metadata("sql", &id, &metadata).await.unwrap();
        store.backdate("sql", &id, NOW - Duration::days(400)).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone());
        let report = sweeper.sweep_at(&[config(Some(".bak"))], NOW).await.unwrap();
        assert_eq!(report, SweepReport { examined: 1, deleted: 1 });
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unbounded_retention_keeps_everything() {
        let store = Arc::new(MockStore::default());
        let id = seed(&store, ".bak", Some(9000), 9000).await;
        let mut keep_forever = config(None);
        keep_forever.retention_days = u32::MAX;
        let report = RetentionSweeper::new(store.clone()).sweep_at(&[keep_forever], NOW).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(store.list("sql", None).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_unparseable_last_write_falls_back_to_creation() {
        let properties = ObjectProperties {
            tags: ObjectTags::default(),
            metadata: ObjectMetadata {
                last_write_time_utc: Some("yesterday".to_string()),
                ..Default::default()
            },
            created_at: NOW - Duration::days(40),
        };
        assert!(is_expired(&properties, NOW - Duration::days(30)));
    }
}
