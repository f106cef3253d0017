//! Deriving an object's tags and metadata from the file it backs up.

use crate::change::ChangeEvent;
use crate::error::{ErrorKind, Result};
use kept_storage::models::format_timestamp;
use kept_storage::{ObjectMetadata, ObjectTags};
use regex::Regex;
use std::sync::LazyLock;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Separates the logical name from the rest of a backup file name, e.g.
/// `payroll_backup_2024_01_02_030405.bak`.
const BACKUP_MARKER: &str = "_backup_";

static BACKUP_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{4}_\d{2}_\d{2}_\d{6})").unwrap());

/// Entity a backup file belongs to: the file name up to the first
/// `_backup_`, or the whole file name.
///
/// ```
/// use kept_backup::record::logical_name;
/// assert_eq!(logical_name("payroll_backup_2024_01_02_030405.bak"), "payroll");
/// assert_eq!(logical_name("notes.txt"), "notes.txt");
/// ```
pub fn logical_name(file_name: &str) -> &str {
    file_name.split_once(BACKUP_MARKER).map_or(file_name, |(name, _)| name)
}

/// Point in time a backup was taken, from the first `YYYY_MM_DD_HHMMSS`
/// token in its file name (interpreted as UTC).
pub fn backup_timestamp(file_name: &str) -> Result<OffsetDateTime> {
    let token = BACKUP_TIMESTAMP
        .find(file_name)
        .ok_or_else(|| exn::Exn::from(ErrorKind::BackupTimestamp(file_name.to_string())))?;
    let format = format_description!("[year]_[month]_[day]_[hour][minute][second]");
    match PrimitiveDateTime::parse(token.as_str(), format) {
        Ok(timestamp) => Ok(timestamp.assume_utc()),
        Err(_) => exn::bail!(ErrorKind::BackupTimestamp(file_name.to_string())),
    }
}

/// Searchable tags for the file an event currently refers to.
pub fn tags_for(event: &ChangeEvent) -> ObjectTags {
    ObjectTags::new(
        &event.folder.container,
        &event.file.extension,
        &event.relative_path,
        &event.file.name,
        logical_name(&event.file.name),
    )
}

/// Metadata for the file an event currently refers to.
///
/// Fails when the file name carries no backup timestamp; nothing may be
/// written for such a file.
pub fn metadata_for(event: &ChangeEvent, compressed: bool) -> Result<ObjectMetadata> {
    let backup_time = backup_timestamp(&event.file.name)?;
    Ok(ObjectMetadata {
        compressed,
        relative_path: Some(event.relative_path.clone()),
        file_extension: Some(event.file.extension.clone()),
        file_name: Some(event.file.name.clone()),
        last_write_time_utc: event.file.last_write.map(format_timestamp),
        logical_name: Some(logical_name(&event.file.name).to_string()),
        backup_timestamp: Some(format_timestamp(backup_time)),
    })
}
