//! Change events flowing from folder watchers to the dispatcher.

use kept_config::FolderConfig;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

/// What happened to a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Renamed,
    Deleted,
}
impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Deleted => "deleted",
        }
    }
}
impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// The source file an event refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub name: String,
    /// Extension with its leading dot, or empty
    pub extension: String,
    /// `None` when the file doesn't exist (anymore)
    pub last_write: Option<OffsetDateTime>,
}
impl FileDescriptor {
    pub fn from_path(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: file_name(path),
            extension: file_extension(path),
            last_write: last_write(path),
        }
    }

    /// Re-read the last write time; files are often still being written when
    /// their first event fires.
    pub fn refresh(&mut self) {
        self.last_write = last_write(&self.path);
    }
}

/// Name and relative path a file had before a rename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviousName {
    pub relative_path: String,
    pub file_name: String,
}

/// A single change to a file inside a watched folder.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// `None` for files found by the startup enumeration
    pub kind: Option<ChangeKind>,
    pub folder: Arc<FolderConfig>,
    pub file: FileDescriptor,
    pub relative_path: String,
    /// Only set for renames
    pub previous: Option<PreviousName>,
}
impl ChangeEvent {
    pub fn new(folder: Arc<FolderConfig>, kind: Option<ChangeKind>, path: &Path) -> Self {
        let relative_path = relative_path(&folder.path, path);
        Self {
            kind,
            file: FileDescriptor::from_path(path),
            relative_path,
            previous: None,
            folder,
        }
    }

    pub fn renamed(folder: Arc<FolderConfig>, from: &Path, to: &Path) -> Self {
        let previous = PreviousName {
            relative_path: relative_path(&folder.path, from),
            file_name: file_name(from),
        };
        Self {
            previous: Some(previous),
            ..Self::new(folder, Some(ChangeKind::Renamed), to)
        }
    }

    /// The kind the dispatcher acts on: startup events are handled like
    /// modifications.
    pub fn effective_kind(&self) -> ChangeKind {
        self.kind.unwrap_or(ChangeKind::Modified)
    }
}

/// Path of `path` below `folder`, with a leading `/` and forward slashes on
/// every platform. Paths outside `folder` are returned whole.
pub fn relative_path(folder: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(folder).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy()),
            _ => None,
        })
        .fold(String::new(), |mut acc, segment| {
            acc.push('/');
            acc.push_str(&segment);
            acc
        })
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Lowercased, with its leading dot, so `X.BAK` is tagged and filtered as `.bak`.
pub(crate) fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

fn last_write(path: &Path) -> Option<OffsetDateTime> {
    std::fs::metadata(path).and_then(|metadata| metadata.modified()).ok().map(OffsetDateTime::from)
}
