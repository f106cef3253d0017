//! Object models.
//!
//! Stores keep no index of their own. Everything the pipeline needs to know
//! about an object is attached to it at write time: a small set of searchable
//! [`ObjectTags`] and a larger [`ObjectMetadata`] record used when restoring or
//! sweeping.

use crate::search::{TagField, sanitize};
use kept_compress::Compression;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Opaque identifier of one object inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);
impl ObjectId {
    /// Generate a fresh, store-assigned identifier (`<uuid-v4>-<unix-nanos>`).
    pub fn generate() -> Self {
        Self(format!("{}-{}", Uuid::new_v4(), OffsetDateTime::now_utc().unix_timestamp_nanos()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}
impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Searchable tags attached to every object.
///
/// Values are always stored sanitized (see [`sanitize`]) so they can be
/// embedded in a tag query; build them with [`ObjectTags::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectTags {
    /// Container the object was written to
    pub prefix: String,
    pub file_extension: String,
    pub relative_path: String,
    pub file_name: String,
    /// Entity the object belongs to, see `logicalName`
    #[serde(rename = "Name")]
    pub logical_name: String,
}
impl ObjectTags {
    pub const PREFIX: &'static str = "Prefix";
    pub const LOGICAL_NAME: &'static str = "Name";

    /// Build a tag set, sanitizing every value.
    pub fn new(
        prefix: &str,
        file_extension: &str,
        relative_path: &str,
        file_name: &str,
        logical_name: &str,
    ) -> Self {
        Self {
            prefix: sanitize(prefix),
            file_extension: sanitize(file_extension),
            relative_path: sanitize(relative_path),
            file_name: sanitize(file_name),
            logical_name: sanitize(logical_name),
        }
    }

    /// Value of a searchable field.
    pub fn get(&self, field: TagField) -> &str {
        match field {
            TagField::FileExtension => &self.file_extension,
            TagField::RelativePath => &self.relative_path,
            TagField::FileName => &self.file_name,
        }
    }

    /// Flatten into the key/value pairs a tagging API expects.
    pub fn to_pairs(&self) -> Vec<(&'static str, &str)> {
        vec![
            (Self::PREFIX, self.prefix.as_str()),
            (TagField::FileExtension.as_str(), self.file_extension.as_str()),
            (TagField::RelativePath.as_str(), self.relative_path.as_str()),
            (TagField::FileName.as_str(), self.file_name.as_str()),
            (Self::LOGICAL_NAME, self.logical_name.as_str()),
        ]
    }

    /// Rebuild from stored key/value pairs. Values are taken verbatim (they
    /// were sanitized on the way in); unknown keys are ignored.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut tags = Self::default();
        for (key, value) in pairs {
            let slot = match key {
                Self::PREFIX => &mut tags.prefix,
                Self::LOGICAL_NAME => &mut tags.logical_name,
                other => match other.parse::<TagField>() {
                    Ok(TagField::FileExtension) => &mut tags.file_extension,
                    Ok(TagField::RelativePath) => &mut tags.relative_path,
                    Ok(TagField::FileName) => &mut tags.file_name,
                    Err(_) => continue,
                },
            };
            *slot = value.to_string();
        }
        tags
    }
}

/// Descriptive metadata attached to every object.
///
/// Everything except `compressed` is optional: a reader must treat a missing
/// field as unknown. Timestamps are kept in their stored (RFC 3339) form so
/// that "present but unparseable" stays distinguishable from "absent"; use the
/// accessor methods to get typed values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectMetadata {
    /// Missing means `false`.
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_time_utc: Option<String>,
    #[serde(default, rename = "Name", skip_serializing_if = "Option::is_none")]
    pub logical_name: Option<String>,
    #[serde(default, rename = "BackupDateTime", skip_serializing_if = "Option::is_none")]
    pub backup_timestamp: Option<String>,
}

const META_COMPRESSED: &str = "Compressed";
const META_RELATIVE_PATH: &str = "RelativePath";
const META_FILE_EXTENSION: &str = "FileExtension";
const META_FILE_NAME: &str = "FileName";
const META_LAST_WRITE: &str = "LastWriteTimeUtc";
const META_LOGICAL_NAME: &str = "Name";
const META_BACKUP_TIMESTAMP: &str = "BackupDateTime";

impl ObjectMetadata {
    /// The compression applied to the stored content.
    pub fn compression(&self) -> Compression {
        Compression::from_flag(self.compressed)
    }

    /// Last write time of the source file, if recorded and parseable.
    pub fn last_write_time(&self) -> Option<OffsetDateTime> {
        self.last_write_time_utc.as_deref().and_then(parse_timestamp)
    }

    /// Backup time parsed from the file name, if recorded and parseable.
    pub fn backup_time(&self) -> Option<OffsetDateTime> {
        self.backup_timestamp.as_deref().and_then(parse_timestamp)
    }

    /// Flatten into string pairs for stores that only hold string maps.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(META_COMPRESSED, self.compressed.to_string())];
        let optional = [
            (META_RELATIVE_PATH, &self.relative_path),
            (META_FILE_EXTENSION, &self.file_extension),
            (META_FILE_NAME, &self.file_name),
            (META_LAST_WRITE, &self.last_write_time_utc),
            (META_LOGICAL_NAME, &self.logical_name),
            (META_BACKUP_TIMESTAMP, &self.backup_timestamp),
        ];
        pairs.extend(optional.into_iter().filter_map(|(key, value)| value.clone().map(|v| (key, v))));
        pairs
    }

    /// Rebuild from a string map. Keys match case-insensitively because some
    /// stores (S3) lowercase user metadata keys.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut metadata = Self::default();
        for (key, value) in pairs {
            let slot = match key {
                k if k.eq_ignore_ascii_case(META_COMPRESSED) => {
                    metadata.compressed = value.eq_ignore_ascii_case("true");
                    continue;
                },
                k if k.eq_ignore_ascii_case(META_RELATIVE_PATH) => &mut metadata.relative_path,
                k if k.eq_ignore_ascii_case(META_FILE_EXTENSION) => &mut metadata.file_extension,
                k if k.eq_ignore_ascii_case(META_FILE_NAME) => &mut metadata.file_name,
                k if k.eq_ignore_ascii_case(META_LAST_WRITE) => &mut metadata.last_write_time_utc,
                k if k.eq_ignore_ascii_case(META_LOGICAL_NAME) => &mut metadata.logical_name,
                k if k.eq_ignore_ascii_case(META_BACKUP_TIMESTAMP) => &mut metadata.backup_timestamp,
                _ => continue,
            };
            *slot = Some(value.to_string());
        }
        metadata
    }
}

/// Everything a store knows about an object without reading its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProperties {
    pub tags: ObjectTags,
    pub metadata: ObjectMetadata,
    /// Assigned by the store when the object was first written.
    pub created_at: OffsetDateTime,
}

/// Render a timestamp the way it is stored in metadata (RFC 3339, UTC).
pub fn format_timestamp(timestamp: OffsetDateTime) -> String {
    // Formatting a UTC OffsetDateTime as RFC 3339 only fails for years
    // outside 0..=9999, which no file system reports.
    timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string())
}

/// Parse a stored metadata timestamp.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).ok()
}
