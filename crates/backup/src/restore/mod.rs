//! Restoring backups, grouped by the entity they belong to.
//!
//! Objects are listed from a job's backup container (and optionally a log
//! container), grouped by logical name and either restored in full or reduced
//! to the latest backup plus the logs taken at or after it.

pub mod basic;

pub use crate::restore::basic::BasicRestore;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use kept_compress::Compression;
use kept_config::{RestoreJob, RestoreMode};
use kept_storage::{ObjectId, ObjectLocator, ObjectProperties, ObjectSearch, StoreHandle};
use std::ops::AddAssign;
use std::path::{Component, Path};
use time::OffsetDateTime;

/// An object that carries everything a grouped restore needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreCandidate {
    pub id: ObjectId,
    pub logical_name: String,
    pub file_name: String,
    pub backup_time: OffsetDateTime,
    pub compressed: bool,
}
impl RestoreCandidate {
    /// `None` unless logical name, file name and a parseable backup time are
    /// all recorded.
    pub fn from_properties(id: ObjectId, properties: &ObjectProperties) -> Option<Self> {
        let metadata = &properties.metadata;
        Some(Self {
            logical_name: metadata.logical_name.clone()?,
            file_name: metadata.file_name.clone()?,
            backup_time: metadata.backup_time()?,
            compressed: metadata.compressed,
            id,
        })
    }
}

/// Backups and logs sharing one logical name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreGroup {
    pub logical_name: String,
    pub backups: Vec<RestoreCandidate>,
    pub logs: Vec<RestoreCandidate>,
}
impl RestoreGroup {
    /// Reduce to what `mode` restores. For [`RestoreMode::Latest`] that is the
    /// newest backup and every log taken at or after it.
    pub fn select(&mut self, mode: RestoreMode) {
        if mode == RestoreMode::All {
            return;
        }
        let Some(latest) = self
            .backups
            .iter()
            .enumerate()
            // First of equals wins
            .max_by(|(ai, a), (bi, b)| a.backup_time.cmp(&b.backup_time).then(bi.cmp(ai)))
            .map(|(_, backup)| backup.clone())
        else {
            return;
        };
        self.logs.retain(|log| log.backup_time >= latest.backup_time);
        self.backups = vec![latest];
    }
}

/// Whether a logical name passes a job's include/exclude lists. Exclusion
/// wins; an empty include list includes everything.
pub fn is_selected(job: &RestoreJob, logical_name: &str) -> bool {
    if job.exclude.iter().any(|name| name == logical_name) {
        return false;
    }
    job.include.is_empty() || job.include.iter().any(|name| name == logical_name)
}

/// Group backups by logical name, in order of first appearance, attaching
/// the logs that share each name. Logs without a matching backup are dropped.
pub fn group(backups: Vec<RestoreCandidate>, logs: &[RestoreCandidate]) -> Vec<RestoreGroup> {
    let mut groups: Vec<RestoreGroup> = Vec::new();
    for backup in backups {
        match groups.iter_mut().find(|group| group.logical_name == backup.logical_name) {
            Some(group) => group.backups.push(backup),
            None => groups.push(RestoreGroup {
                logical_name: backup.logical_name.clone(),
                backups: vec![backup],
                logs: Vec::new(),
            }),
        }
    }
    for group in &mut groups {
        group.logs = logs.iter().filter(|log| log.logical_name == group.logical_name).cloned().collect();
    }
    groups
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub groups: usize,
    pub backups: usize,
    pub logs: usize,
}
impl AddAssign for RestoreReport {
    fn add_assign(&mut self, rhs: Self) {
        self.groups += rhs.groups;
        self.backups += rhs.backups;
        self.logs += rhs.logs;
    }
}

/// Whether `name` can be used as a single path segment below a restore
/// directory.
pub(crate) fn is_plain_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

/// Fetch an object, undo its compression and write it to `target`, creating
/// parent directories as needed. Returns the number of bytes written.
pub(crate) async fn download(
    store: &StoreHandle,
    container: &str,
    id: &ObjectId,
    compressed: bool,
    target: &Path,
) -> Result<usize> {
    let content = store.get(container, id).await.or_raise(|| ErrorKind::Storage)?;
    let content = Compression::from_flag(compressed).decompress(&content).or_raise(|| ErrorKind::Compression)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
    }
    tokio::fs::write(target, &content).await.or_raise(|| ErrorKind::Io(target.to_path_buf()))?;
    tracing::info!(container, object = %id, path = %target.display(), bytes = content.len(), compressed, "Restored object");
    Ok(content.len())
}

/// Runs grouped restore jobs against a store.
pub struct RestoreGrouper {
    locator: ObjectLocator,
}
impl RestoreGrouper {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            locator: ObjectLocator::new(store),
        }
    }

    /// Every object in `container` usable by `job`, in store order.
    async fn candidates(&self, container: &str, job: &RestoreJob) -> Result<Vec<RestoreCandidate>> {
        let store = self.locator.store();
        let ids = self.locator.find_all(container, &ObjectSearch::new()).await.or_raise(|| ErrorKind::Storage)?;
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            let properties = store.properties(container, &id).await.or_raise(|| ErrorKind::Storage)?;
            let Some(candidate) = RestoreCandidate::from_properties(id, &properties) else {
                continue;
            };
            if !is_plain_segment(&candidate.file_name) || !is_plain_segment(&candidate.logical_name) {
                tracing::warn!(
                    container,
                    object = %candidate.id,
                    file_name = %candidate.file_name,
                    logical_name = %candidate.logical_name,
                    "Skipping object with unsafe name"
                );
                continue;
            }
            if is_selected(job, &candidate.logical_name) {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    /// The groups `job` would restore, after selection.
    pub async fn plan(&self, job: &RestoreJob) -> Result<Vec<RestoreGroup>> {
        let backups = self.candidates(&job.backup_container, job).await?;
        let logs = match job.log_target() {
            Some((container, _)) => self.candidates(container, job).await?,
            None => Vec::new(),
        };
        let mut groups = group(backups, &logs);
        for group in &mut groups {
            group.select(job.mode);
        }
        tracing::debug!(container = %job.backup_container, mode = ?job.mode, groups = groups.len(), "Planned restore");
        Ok(groups)
    }

    pub async fn restore(&self, job: &RestoreJob) -> Result<RestoreReport> {
        let store = self.locator.store();
        let groups = self.plan(job).await?;
        let mut report = RestoreReport {
            groups: groups.len(),
            ..Default::default()
        };
        for group in &groups {
            for backup in &group.backups {
                let target = job.restore_path.join(&backup.file_name);
                download(store, &job.backup_container, &backup.id, backup.compressed, &target).await?;
                report.backups += 1;
            }
            if let Some((container, log_path)) = job.log_target() {
                for log in &group.logs {
                    let target = log_path.join(&log.logical_name).join(&log.file_name);
                    download(store, container, &log.id, log.compressed, &target).await?;
                    report.logs += 1;
                }
            }
        }
        tracing::info!(
            container = %job.backup_container,
            groups = report.groups,
            backups = report.backups,
            logs = report.logs,
            "Restore complete"
        );
        Ok(report)
    }

    pub async fn restore_all(&self, jobs: &[RestoreJob]) -> Result<RestoreReport> {
        let mut total = RestoreReport::default();
        for job in jobs {
            total += self.restore(job).await?;
        }
        Ok(total)
    }
}
