//! Applying queued changes to the object store.
//!
//! Every change is resolved against the store by tag lookup: the store is the
//! only record of what has been backed up, so replaying a change is safe.

use crate::change::{ChangeEvent, ChangeKind};
use crate::error::{ErrorKind, Result};
use crate::lock::is_locked;
use crate::queue::ChangeReceiver;
use crate::record::{metadata_for, tags_for};
use exn::ResultExt;
use kept_compress::Compression;
use kept_storage::models::format_timestamp;
use kept_storage::{ObjectId, ObjectLocator, ObjectSearch, StoreHandle};
use std::io::ErrorKind as IoErrorKind;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The outcome of (successfully) applying a single change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No object existed for the file; a new one was written.
    Created(ObjectId),
    /// The existing object's content, tags and metadata were replaced.
    Updated(ObjectId),
    /// The existing object was re-tagged under the file's new name.
    Renamed(ObjectId),
    Deleted(ObjectId),
    /// Found at startup, and already backed up with the same last write time.
    Unchanged(ObjectId),
    /// Nothing to do: deletions are disabled for the folder, or the file or
    /// its object had already gone.
    Skipped,
}

/// Applies [`ChangeEvent`]s to a store.
#[derive(Clone)]
pub struct ChangeProcessor {
    locator: ObjectLocator,
}
impl ChangeProcessor {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            locator: ObjectLocator::new(store),
        }
    }

    pub async fn process(&self, event: &ChangeEvent) -> Result<Outcome> {
        match event.effective_kind() {
            ChangeKind::Created | ChangeKind::Modified => self.upsert(event).await,
            ChangeKind::Renamed => self.rename(event).await,
            ChangeKind::Deleted => self.remove(event).await,
        }
    }

    async fn find(&self, container: &str, relative_path: &str, file_name: &str) -> Result<Option<ObjectId>> {
        let search = ObjectSearch::new().relative_path(relative_path).file_name(file_name);
        self.locator.find_one(container, &search).await.or_raise(|| ErrorKind::Storage)
    }

    /// Write the file's current content, over its existing object if there
    /// is one.
    async fn upsert(&self, event: &ChangeEvent) -> Result<Outcome> {
        let store = self.locator.store();
        let container = event.folder.container.as_str();
        let existing = self.find(container, &event.relative_path, &event.file.name).await?;
        if existing.is_none() && event.kind == Some(ChangeKind::Modified) {
            tracing::warn!(container, relative_path = %event.relative_path, "No object for modified file, backing it up as new");
        }

        if let (None, Some(id)) = (event.kind, &existing) {
            let properties = store.properties(container, id).await.or_raise(|| ErrorKind::Storage)?;
            let current = event.file.last_write.map(format_timestamp);
            if current.is_some() && properties.metadata.last_write_time_utc == current {
                return Ok(Outcome::Unchanged(id.clone()));
            }
        }

        let compression = Compression::from_flag(event.folder.compress);
        // Validated before reading: a file without a backup timestamp is never written.
        let metadata = metadata_for(event, compression.is_compressed())?;
        let tags = tags_for(event);
        let content = match tokio::fs::read(&event.file.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                tracing::warn!(path = %event.file.path.display(), "File disappeared before it could be backed up");
                return Ok(Outcome::Skipped);
            },
            Err(err) => return Err(err).or_raise(|| ErrorKind::Io(event.file.path.clone())),
        };
        let content = compression.compress(&content).or_raise(|| ErrorKind::Compression)?;
        let id = store
            .put(container, existing.as_ref(), &content, &tags, &metadata)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        Ok(match existing {
            Some(_) => Outcome::Updated(id),
            None => Outcome::Created(id),
        })
    }

    /// Move the object for the file's previous name over to its new name,
    /// without rewriting content.
    async fn rename(&self, event: &ChangeEvent) -> Result<Outcome> {
        let Some(previous) = &event.previous else {
            return self.upsert(event).await;
        };
        let store = self.locator.store();
        let container = event.folder.container.as_str();
        let Some(id) = self.find(container, &previous.relative_path, &previous.file_name).await? else {
            tracing::warn!(
                container,
                from = %previous.relative_path,
                to = %event.relative_path,
                "No object for renamed file, backing it up as new"
            );
            return self.upsert(event).await;
        };
        // The content is untouched, so its compression state carries over.
        let compressed = store
            .properties(container, &id)
            .await
            .or_raise(|| ErrorKind::Storage)?
            .metadata
            .compressed;
        let metadata = metadata_for(event, compressed)?;
        store.set_metadata(container, &id, &metadata).await.or_raise(|| ErrorKind::Storage)?;
        store.set_tags(container, &id, &tags_for(event)).await.or_raise(|| ErrorKind::Storage)?;
        Ok(Outcome::Renamed(id))
    }

    async fn remove(&self, event: &ChangeEvent) -> Result<Outcome> {
        if !event.folder.remove_on_delete {
            return Ok(Outcome::Skipped);
        }
        let container = event.folder.container.as_str();
        let Some(id) = self.find(container, &event.relative_path, &event.file.name).await? else {
            tracing::warn!(relative_path = %event.relative_path, container, "No object found for deleted file");
            return Ok(Outcome::Skipped);
        };
        self.locator.store().delete(container, &id).await.or_raise(|| ErrorKind::Storage)?;
        Ok(Outcome::Deleted(id))
    }
}

/// The single consumer of the change queue.
pub struct ChangeDispatcher {
    processor: ChangeProcessor,
    receiver: ChangeReceiver,
    poll_interval: Duration,
}
impl ChangeDispatcher {
    pub fn new(store: StoreHandle, receiver: ChangeReceiver, poll_interval: Duration) -> Self {
        Self {
            processor: ChangeProcessor::new(store),
            receiver,
            poll_interval,
        }
    }

    /// Process changes one at a time until `cancel` fires.
    ///
    /// A change whose file is still locked goes back to the tail of the queue.
    /// A file without a backup timestamp is logged and dropped; any other
    /// failure ends the run with its error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(poll_interval = ?self.poll_interval, "Dispatcher started");
        while !cancel.is_cancelled() {
            let Some(mut event) = self.receiver.try_next() else {
                if !idle(self.poll_interval, &cancel).await {
                    break;
                }
                continue;
            };
            if is_locked(&event.file.path) {
                tracing::debug!(path = %event.file.path.display(), "File is locked, retrying later");
                self.receiver.requeue(event);
                if !idle(self.poll_interval, &cancel).await {
                    break;
                }
                continue;
            }
            event.file.refresh();
            let kind = event.effective_kind();
            let outcome = match self.processor.process(&event).await {
                Ok(outcome) => outcome,
                Err(err) if matches!(&*err, ErrorKind::BackupTimestamp(_)) => {
                    tracing::warn!(
                        kind = %kind,
                        container = %event.folder.container,
                        relative_path = %event.relative_path,
                        "{}; not backing it up",
                        &*err
                    );
                    continue;
                },
                Err(err) => {
                    tracing::error!(
                        kind = %kind,
                        container = %event.folder.container,
                        relative_path = %event.relative_path,
                        "Unable to process change"
                    );
                    return Err(err);
                },
            };
            tracing::info!(
                kind = %kind,
                container = %event.folder.container,
                relative_path = %event.relative_path,
                outcome = ?outcome,
                "Processed change"
            );
        }
        tracing::info!(pending = self.receiver.len(), "Dispatcher stopped");
        Ok(())
    }
}

/// Sleep for one poll interval; `false` if cancelled meanwhile.
async fn idle(poll_interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(poll_interval) => true,
    }
}
