//! Watching folders and turning file system notifications into
//! [`ChangeEvent`]s.

use crate::change::{ChangeEvent, ChangeKind, file_extension};
use crate::error::{ErrorKind, Result};
use crate::queue::ChangeSender;
use exn::ResultExt;
use kept_config::FolderConfig;
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Stateful translation of raw notifications for one folder.
///
/// Renames arrive from most platforms as separate "from" and "to" halves,
/// sometimes followed by a combined event carrying both paths. Halves are
/// paired up here; a "from" that never sees its partner is reported as a
/// deletion once the next unrelated notification arrives or it has waited
/// long enough (see [`EventTranslator::flush_older_than`]), and an unpaired
/// "to" as a creation.
pub struct EventTranslator {
    folder: Arc<FolderConfig>,
    pending_from: Option<PendingFrom>,
    // Tracker of a rename already reported from its halves.
    completed: Option<usize>,
}
struct PendingFrom {
    tracker: Option<usize>,
    path: PathBuf,
    since: Instant,
}

impl EventTranslator {
    pub fn new(folder: Arc<FolderConfig>) -> Self {
        Self {
            folder,
            pending_from: None,
            completed: None,
        }
    }

    pub fn translate(&mut self, event: &Event) -> Vec<ChangeEvent> {
        let tracker = event.tracker();
        let mut changes = Vec::new();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                changes.extend(self.flush());
                if let Some(path) = event.paths.first() {
                    self.pending_from = Some(PendingFrom {
                        tracker,
                        path: path.clone(),
                        since: Instant::now(),
                    });
                }
                return changes;
            },
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let Some(to) = event.paths.first() else {
                    return changes;
                };
                match self.pending_from.take() {
                    Some(pending) if pending.tracker == tracker => {
                        self.completed = tracker;
                        changes.extend(self.rename(&pending.path, to));
                    },
                    other => {
                        self.pending_from = other;
                        changes.extend(self.flush());
                        changes.extend(self.single(ChangeKind::Created, to));
                    },
                }
                return changes;
            },
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if tracker.is_some() && tracker == self.completed {
                    self.completed = None;
                    return changes;
                }
                if self.pending_from.as_ref().is_some_and(|pending| pending.tracker == tracker) {
                    self.pending_from = None;
                }
                changes.extend(self.flush());
                if let [from, to, ..] = event.paths.as_slice() {
                    changes.extend(self.rename(from, to));
                }
                return changes;
            },
            _ => {},
        }

        changes.extend(self.flush());
        let kind = match event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => return changes,
            EventKind::Create(_) => ChangeKind::Created,
            // Platforms that can't tell the halves apart: go by what's on disk now.
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    let kind = match path.exists() {
                        true => ChangeKind::Created,
                        false => ChangeKind::Deleted,
                    };
                    changes.extend(self.single(kind, path));
                }
                return changes;
            },
            EventKind::Modify(
                ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other | ModifyKind::Metadata(MetadataKind::WriteTime),
            ) => ChangeKind::Modified,
            EventKind::Remove(_) => ChangeKind::Deleted,
            _ => return changes,
        };
        for path in &event.paths {
            changes.extend(self.single(kind, path));
        }
        changes
    }

    /// Report a rename half that is still waiting for its partner as a
    /// deletion.
    pub fn flush(&mut self) -> Option<ChangeEvent> {
        let pending = self.pending_from.take()?;
        self.single(ChangeKind::Deleted, &pending.path)
    }

    /// [`flush`](Self::flush), but only once the half has waited at least
    /// `age` for its partner.
    pub fn flush_older_than(&mut self, age: Duration) -> Option<ChangeEvent> {
        if self.pending_from.as_ref()?.since.elapsed() < age {
            return None;
        }
        self.flush()
    }

    fn single(&self, kind: ChangeKind, path: &Path) -> Option<ChangeEvent> {
        match kind {
            ChangeKind::Deleted if !self.folder.remove_on_delete => return None,
            ChangeKind::Deleted => {},
            _ if path.is_dir() => return None,
            _ => {},
        }
        self.folder
            .accepts_extension(&file_extension(path))
            .then(|| ChangeEvent::new(self.folder.clone(), Some(kind), path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Option<ChangeEvent> {
        if to.is_dir() {
            return None;
        }
        let from_accepted = self.folder.accepts_extension(&file_extension(from));
        let to_accepted = self.folder.accepts_extension(&file_extension(to));
        match (from_accepted, to_accepted) {
            (true, true) => Some(ChangeEvent::renamed(self.folder.clone(), from, to)),
            (false, true) => self.single(ChangeKind::Created, to),
            (true, false) => self.single(ChangeKind::Deleted, from),
            (false, false) => None,
        }
    }
}

struct Running {
    watcher: RecommendedWatcher,
    translator: Arc<Mutex<EventTranslator>>,
    sender: ChangeSender,
}

/// Watches one configured folder, recursively.
pub struct FolderWatcher {
    folder: Arc<FolderConfig>,
    running: Option<Running>,
}
impl FolderWatcher {
    pub fn new(folder: FolderConfig) -> Self {
        Self {
            folder: Arc::new(folder),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start forwarding changes to `sender`. Starting twice is a no-op.
    pub fn start(&mut self, sender: ChangeSender) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let path = self.folder.path.clone();
        let translator = Arc::new(Mutex::new(EventTranslator::new(self.folder.clone())));
        let mut watcher = notify::recommended_watcher({
            let translator = translator.clone();
            let sender = sender.clone();
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    let changes = lock(&translator).translate(&event);
                    forward(&sender, changes);
                },
                Err(err) => tracing::warn!(error = %err, "File watcher reported an error"),
            }
        })
        .or_raise(|| ErrorKind::Watch(path.clone()))?;
        watcher
            .watch(&path, RecursiveMode::Recursive)
            .or_raise(|| ErrorKind::Watch(path.clone()))?;
        tracing::info!(
            container = %self.folder.container,
            path = %path.display(),
            extension = ?self.folder.file_extension,
            "Watching folder"
        );
        self.running = Some(Running {
            watcher,
            translator,
            sender,
        });
        Ok(())
    }

    /// Report a rename "from" half as a deletion once it has waited `age`
    /// without its partner. Returns the number of changes queued.
    pub fn flush_pending(&self, age: Duration) -> usize {
        let Some(running) = &self.running else {
            return 0;
        };
        let flushed = lock(&running.translator).flush_older_than(age);
        forward(&running.sender, flushed)
    }

    /// Queue every file already in the folder (recursively) that passes the
    /// extension filter, as events without a kind.
    pub fn enqueue_existing(&self, sender: &ChangeSender) -> usize {
        let mut count = 0;
        for entry in WalkDir::new(&self.folder.path).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(folder = %self.folder.path.display(), error = %err, "Skipping unreadable entry");
                    continue;
                },
            };
            if !entry.file_type().is_file() || !self.folder.accepts_extension(&file_extension(entry.path())) {
                continue;
            }
            if sender.push(ChangeEvent::new(self.folder.clone(), None, entry.path())) {
                count += 1;
            }
        }
        tracing::info!(folder = %self.folder.path.display(), count, "Queued existing files");
        count
    }

    /// Stop watching. A rename half still waiting for its partner is queued
    /// as a deletion; events already queued are left for the dispatcher.
    pub fn stop(&mut self) {
        if let Some(Running {
            mut watcher,
            translator,
            sender,
        }) = self.running.take()
        {
            if let Err(err) = watcher.unwatch(&self.folder.path) {
                tracing::debug!(folder = %self.folder.path.display(), error = %err, "Unable to unwatch folder");
            }
            drop(watcher);
            let flushed = lock(&translator).flush();
            forward(&sender, flushed);
            tracing::info!(folder = %self.folder.path.display(), "Stopped watching folder");
        }
    }
}

// The translator stays usable after a panic in the notify callback.
fn lock(translator: &Mutex<EventTranslator>) -> std::sync::MutexGuard<'_, EventTranslator> {
    translator.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forward(sender: &ChangeSender, changes: impl IntoIterator<Item = ChangeEvent>) -> usize {
    let mut count = 0;
    for change in changes {
        tracing::debug!(
            kind = %change.effective_kind(),
            path = %change.file.path.display(),
            "Detected change"
        );
        if sender.push(change) {
            count += 1;
        }
    }
    count
}
impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::testing::folder;
    use notify::event::DataChange;

    fn translator() -> EventTranslator {
        EventTranslator::new(folder(Path::new("/watched")))
    }

    fn path(name: &str) -> PathBuf {
        Path::new("/watched").join(name)
    }

    fn kinds(changes: &[ChangeEvent]) -> Vec<(ChangeKind, String)> {
        changes.iter().map(|c| (c.effective_kind(), c.relative_path.clone())).collect()
    }

    #[test]
    fn test_create_modify_remove() {
        let mut t = translator();
        let created = t.translate(&Event::new(EventKind::Create(CreateKind::File)).add_path(path("a.bak")));
        let modified = t.translate(
            &Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path("a.bak")),
        );
        let removed = t.translate(&Event::new(EventKind::Remove(RemoveKind::File)).add_path(path("a.bak")));
        assert_eq!(kinds(&created), vec![(ChangeKind::Created, "/a.bak".to_string())]);
        assert_eq!(kinds(&modified), vec![(ChangeKind::Modified, "/a.bak".to_string())]);
        assert_eq!(kinds(&removed), vec![(ChangeKind::Deleted, "/a.bak".to_string())]);
    }

    #[test]
    fn test_filters_and_ignored_kinds() {
        let mut t = translator();
        assert!(t.translate(&Event::new(EventKind::Create(CreateKind::File)).add_path(path("a.txt"))).is_empty());
        assert!(t.translate(&Event::new(EventKind::Create(CreateKind::Folder)).add_path(path("sub"))).is_empty());
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(path("a.bak"));
        assert!(t.translate(&access).is_empty());
        let permissions =
            Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions))).add_path(path("a.bak"));
        assert!(t.translate(&permissions).is_empty());
    }

    #[test]
    fn test_deletes_suppressed_when_disabled() {
        let mut config = (*folder(Path::new("/watched"))).clone();
        config.remove_on_delete = false;
        let mut t = EventTranslator::new(Arc::new(config));
        assert!(t.translate(&Event::new(EventKind::Remove(RemoveKind::File)).add_path(path("a.bak"))).is_empty());
        let out_of = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(path("db.bak"))
            .add_path(path("db.old"));
        assert!(t.translate(&out_of).is_empty());
    }

    #[test]
    fn test_rename_halves_then_both() {
        let mut t = translator();
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(path("old.bak"))
            .set_tracker(7);
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(path("new.bak"))
            .set_tracker(7);
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(path("old.bak"))
            .add_path(path("new.bak"))
            .set_tracker(7);
        assert!(t.translate(&from).is_empty());
        let renamed = t.translate(&to);
        assert_eq!(kinds(&renamed), vec![(ChangeKind::Renamed, "/new.bak".to_string())]);
        assert_eq!(renamed[0].previous.as_ref().unwrap().relative_path, "/old.bak");
        assert!(t.translate(&both).is_empty());
    }

    #[test]
    fn test_rename_both_only() {
        let mut t = translator();
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(path("a/old.bak"))
            .add_path(path("b/new.bak"));
        let renamed = t.translate(&both);
        assert_eq!(kinds(&renamed), vec![(ChangeKind::Renamed, "/b/new.bak".to_string())]);
    }

    #[test]
    fn test_unpaired_halves() {
        let mut t = translator();
        // Moved out of the watched tree: only the "from" half arrives.
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(path("gone.bak"))
            .set_tracker(1);
        assert!(t.translate(&from).is_empty());
        let created = t.translate(&Event::new(EventKind::Create(CreateKind::File)).add_path(path("x.bak")));
        assert_eq!(
            kinds(&created),
            vec![(ChangeKind::Deleted, "/gone.bak".to_string()), (ChangeKind::Created, "/x.bak".to_string())]
        );
        // Moved into the watched tree: only the "to" half arrives.
        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(path("arrived.bak"))
            .set_tracker(2);
        assert_eq!(kinds(&t.translate(&to)), vec![(ChangeKind::Created, "/arrived.bak".to_string())]);
        assert!(t.flush().is_none());
    }

    #[test]
    fn test_rename_across_extension_filter() {
        let mut t = translator();
        let into = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(path("db.tmp"))
            .add_path(path("db.bak"));
        assert_eq!(kinds(&t.translate(&into)), vec![(ChangeKind::Created, "/db.bak".to_string())]);
        let out_of = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(path("db.bak"))
            .add_path(path("db.old"));
        assert_eq!(kinds(&t.translate(&out_of)), vec![(ChangeKind::Deleted, "/db.bak".to_string())]);
    }

    #[test]
    fn test_enqueue_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a_backup_2024_01_01_000000.bak"), b"a").unwrap();
        std::fs::write(dir.path().join("nested/b_backup_2024_01_01_000000.BAK"), b"b").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"c").unwrap();
        let watcher = FolderWatcher::new((*folder(dir.path())).clone());
        let (tx, mut rx) = queue::channel();
        assert_eq!(watcher.enqueue_existing(&tx), 2);
        let first = rx.try_next().unwrap();
        assert_eq!(first.kind, None);
        assert_eq!(first.relative_path, "/a_backup_2024_01_01_000000.bak");
        assert_eq!(rx.try_next().unwrap().relative_path, "/nested/b_backup_2024_01_01_000000.BAK");
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn test_unpaired_from_is_flushed_after_waiting() {
        let mut t = translator();
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From))).add_path(path("db.bak"));
        assert!(t.translate(&from).is_empty());
        assert!(t.flush_older_than(Duration::from_secs(3600)).is_none());
        let flushed = t.flush_older_than(Duration::ZERO).unwrap();
        assert_eq!(flushed.effective_kind(), ChangeKind::Deleted);
        assert_eq!(flushed.relative_path, "/db.bak");
        assert!(t.flush().is_none());
    }

    #[test]
    fn test_stop_flushes_unpaired_from() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FolderWatcher::new((*folder(dir.path())).clone());
        let (tx, mut rx) = queue::channel();
        watcher.start(tx).unwrap();
        assert_eq!(watcher.flush_pending(Duration::ZERO), 0);

        // The file was moved out of the tree; nothing else happens before shutdown.
        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(dir.path().join("db_backup_2024_01_02_030405.bak"));
        let running = watcher.running.as_ref().unwrap();
        assert!(lock(&running.translator).translate(&from).is_empty());
        watcher.stop();
        assert!(!watcher.is_running());

        let deleted = rx.try_next().unwrap();
        assert_eq!(deleted.effective_kind(), ChangeKind::Deleted);
        assert_eq!(deleted.relative_path, "/db_backup_2024_01_02_030405.bak");
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn test_watch_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FolderWatcher::new((*folder(&dir.path().join("missing"))).clone());
        let (tx, _rx) = queue::channel();
        let err = watcher.start(tx).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Watch(_)));
        assert!(!watcher.is_running());
    }
}
