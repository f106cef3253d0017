//! Backup, restore and retention against a kept object store.
//!
//! Watched folders feed a single [`ChangeDispatcher`] through an unbounded
//! queue; the dispatcher mirrors each change into the store. Restores and
//! retention sweeps run in batch against the same store.

pub mod change;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod queue;
pub mod record;
pub mod restore;
pub mod retention;
#[cfg(test)]
mod testing;
pub mod watch;

pub use crate::change::{ChangeEvent, ChangeKind};
pub use crate::dispatch::{ChangeDispatcher, ChangeProcessor, Outcome};
use crate::error::Result;
pub use crate::restore::{BasicRestore, RestoreGrouper, RestoreReport};
pub use crate::retention::{RetentionSweeper, SweepReport};
pub use crate::watch::FolderWatcher;
use kept_config::BackupSettings;
use kept_storage::StoreHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Watch every configured folder and mirror changes into `store` until
/// `cancel` fires or a change fails.
///
/// Watchers start before existing files are enumerated, so nothing written
/// in between is missed; seeing a file twice is harmless.
pub async fn run_backup(store: StoreHandle, settings: &BackupSettings, cancel: CancellationToken) -> Result<()> {
    let (sender, receiver) = queue::channel();
    let mut watchers = Vec::with_capacity(settings.folders.len());
    for folder in &settings.folders {
        let mut watcher = FolderWatcher::new(folder.clone());
        watcher.start(sender.clone())?;
        watchers.push(watcher);
    }
    for watcher in &watchers {
        watcher.enqueue_existing(&sender);
    }
    drop(sender);

    let poll_interval = Duration::from_millis(settings.poll_interval_ms);
    let dispatcher = ChangeDispatcher::new(store, receiver, poll_interval);
    let stop_flushing = cancel.child_token();
    let (result, ()) = tokio::join!(
        async {
            let result = dispatcher.run(cancel.clone()).await;
            stop_flushing.cancel();
            result
        },
        flush_unpaired_renames(&watchers, poll_interval, &stop_flushing),
    );
    for watcher in &mut watchers {
        watcher.stop();
    }
    result
}

/// Turn rename halves that waited a whole poll interval for their partner
/// into deletions, until `cancel` fires.
async fn flush_unpaired_renames(watchers: &[FolderWatcher], every: Duration, cancel: &CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {},
        }
        for watcher in watchers {
            watcher.flush_pending(every);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kept_config::FolderConfig;
    use kept_storage::backend::MockStore;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_existing_files_are_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("db_backup_2024_01_02_030405.bak"), b"data").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let settings = BackupSettings {
            poll_interval_ms: 100,
            folders: vec![FolderConfig {
                container: "sql".to_string(),
                path: dir.path().to_path_buf(),
                file_extension: Some(".bak".to_string()),
                remove_on_delete: false,
                compress: true,
            }],
        };
        let store = Arc::new(MockStore::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let store = store.clone();
            let cancel = cancel.clone();
            async move { run_backup(store, &settings, cancel).await }
        });
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(store.len().await, 1);
    }
}
