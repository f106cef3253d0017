use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_RETENTION_DAYS: u32 = 30;

/// The full configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub backup: BackupSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub restore: RestoreSettings,
}

/// Which object store to back up into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreSettings {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
}
impl Default for StoreSettings {
    fn default() -> Self {
        // Empty (and therefore relative) when the platform has no data dir;
        // validation then asks for an explicit root.
        let root = ProjectDirs::from("", "", "kept")
            .map(|dirs| dirs.data_dir().join("store"))
            .unwrap_or_default();
        Self::Local { root }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSettings {
    /// How long the dispatcher sleeps when the queue is empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub folders: Vec<FolderConfig>,
}
impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            folders: Vec::new(),
        }
    }
}

/// One watched folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Container objects from this folder are written to
    pub container: String,
    /// Absolute path of the watched folder
    pub path: PathBuf,
    /// Only files with this extension are backed up (e.g. `.bak`)
    #[serde(default)]
    pub file_extension: Option<String>,
    /// Delete the backup when the source file is deleted
    #[serde(default)]
    pub remove_on_delete: bool,
    /// Gzip content before writing it
    #[serde(default)]
    pub compress: bool,
}
impl FolderConfig {
    /// Whether a file extension (with its leading dot, or empty) passes this
    /// folder's filter.
    pub fn accepts_extension(&self, extension: &str) -> bool {
        match &self.file_extension {
            Some(filter) => filter.eq_ignore_ascii_case(extension),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default)]
    pub folders: Vec<RetentionConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub container: String,
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreSettings {
    /// Grouped restores (latest or all backups per logical name)
    #[serde(default)]
    pub jobs: Vec<RestoreJob>,
    /// Filtered restores back into a folder tree
    #[serde(default)]
    pub basic: Vec<BasicRestoreJob>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Latest backup per logical name plus the logs taken since
    #[default]
    #[serde(alias = "Latest")]
    Latest,
    /// Every backup and log
    #[serde(alias = "All")]
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreJob {
    pub backup_container: String,
    pub restore_path: PathBuf,
    #[serde(default)]
    pub log_container: Option<String>,
    #[serde(default)]
    pub log_restore_path: Option<PathBuf>,
    #[serde(default)]
    pub mode: RestoreMode,
    /// Logical names to restore; empty means all of them
    #[serde(default)]
    pub include: Vec<String>,
    /// Logical names to skip, wins over `include`
    #[serde(default)]
    pub exclude: Vec<String>,
}
impl RestoreJob {
    /// Log container and restore path, only when both are configured.
    pub fn log_target(&self) -> Option<(&str, &Path)> {
        match (&self.log_container, &self.log_restore_path) {
            (Some(container), Some(path)) => Some((container.as_str(), path.as_path())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicRestoreJob {
    pub container: String,
    pub restore_path: PathBuf,
    #[serde(default)]
    pub filter: BasicRestoreFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicRestoreFilter {
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

/// Extensions are compared and stored lowercased with their leading dot;
/// accept `bak`, `.bak` and `.BAK` alike in configuration.
fn normalize_extension(extension: &mut Option<String>) {
    *extension = match extension.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(ext) if ext.starts_with('.') => Some(ext.to_ascii_lowercase()),
        Some(ext) => Some(format!(".{}", ext.to_ascii_lowercase())),
    };
}

fn require_container(section: &str, container: &str) -> Result<()> {
    if container.trim().is_empty() {
        exn::bail!(ErrorKind::Invalid(format!("{section}: container name must not be empty")));
    }
    Ok(())
}

impl Settings {
    /// Canonicalize values that have more than one accepted spelling.
    pub fn normalize(&mut self) {
        for folder in &mut self.backup.folders {
            normalize_extension(&mut folder.file_extension);
        }
        for folder in &mut self.retention.folders {
            normalize_extension(&mut folder.file_extension);
        }
        for job in &mut self.restore.basic {
            normalize_extension(&mut job.filter.file_extension);
        }
    }

    /// Reject configuration that can't be acted on, before anything runs.
    pub fn validate(&self) -> Result<()> {
        match &self.store {
            StoreSettings::Local { root } if !root.is_absolute() => {
                exn::bail!(ErrorKind::Invalid(format!(
                    "store: local root `{}` must be an absolute path",
                    root.display()
                )));
            },
            StoreSettings::S3 { bucket, .. } if bucket.trim().is_empty() => {
                exn::bail!(ErrorKind::Invalid("store: S3 bucket must not be empty".to_string()));
            },
            _ => {},
        }
        if self.backup.poll_interval_ms == 0 {
            exn::bail!(ErrorKind::Invalid("backup: poll_interval_ms must be positive".to_string()));
        }
        for folder in &self.backup.folders {
            require_container("backup", &folder.container)?;
            if !folder.path.is_absolute() {
                exn::bail!(ErrorKind::Invalid(format!(
                    "backup: watched folder `{}` must be an absolute path",
                    folder.path.display()
                )));
            }
            if !folder.path.is_dir() {
                exn::bail!(ErrorKind::Invalid(format!(
                    "backup: watched folder `{}` does not exist",
                    folder.path.display()
                )));
            }
        }
        for folder in &self.retention.folders {
            require_container("retention", &folder.container)?;
            if folder.retention_days == 0 {
                exn::bail!(ErrorKind::Invalid(format!(
                    "retention: `{}` must keep objects for at least one day",
                    folder.container
                )));
            }
        }
        for job in &self.restore.jobs {
            require_container("restore", &job.backup_container)?;
            if job.log_container.is_some() != job.log_restore_path.is_some() {
                exn::bail!(ErrorKind::Invalid(format!(
                    "restore: `{}` needs both log_container and log_restore_path, or neither",
                    job.backup_container
                )));
            }
            if let Some(container) = &job.log_container {
                require_container("restore", container)?;
            }
        }
        for job in &self.restore.basic {
            require_container("restore.basic", &job.container)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn local(root: &Path) -> Settings {
        Settings {
            store: StoreSettings::Local { root: root.to_path_buf() },
            ..Default::default()
        }
    }

    fn folder(path: &Path) -> FolderConfig {
        FolderConfig {
            container: "sql".to_string(),
            path: path.to_path_buf(),
            file_extension: None,
            remove_on_delete: false,
            compress: false,
        }
    }

    #[rstest]
    #[case(Some("bak"), Some(".bak"))]
    #[case(Some(".bak"), Some(".bak"))]
    #[case(Some("  trn "), Some(".trn"))]
    #[case(Some(".BAK"), Some(".bak"))]
    #[case(Some(""), None)]
    #[case(None, None)]
    fn test_normalize_extension(#[case] input: Option<&str>, #[case] expected: Option<&str>) {
        let mut extension = input.map(str::to_string);
        normalize_extension(&mut extension);
        assert_eq!(extension.as_deref(), expected);
    }

    #[test]
    fn test_accepts_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut folder = folder(dir.path());
        assert!(folder.accepts_extension(""));
        folder.file_extension = Some(".bak".to_string());
        assert!(folder.accepts_extension(".BAK"));
        assert!(!folder.accepts_extension(".trn"));
    }

    #[test]
    fn test_valid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = local(dir.path());
        settings.backup.folders.push(folder(dir.path()));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_relative_or_missing_folder_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = local(dir.path());
        settings.backup.folders.push(folder(Path::new("relative/dir")));
        assert!(settings.validate().is_err());
        settings.backup.folders[0] = folder(&dir.path().join("missing"));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_container_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = local(dir.path());
        let mut folder = folder(dir.path());
        folder.container = " ".to_string();
        settings.backup.folders.push(folder);
        let err = settings.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = local(dir.path());
        settings.retention.folders.push(RetentionConfig {
            container: "sql".to_string(),
            file_extension: None,
            retention_days: 0,
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_half_configured_log_target_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = local(dir.path());
        let mut job = RestoreJob {
            backup_container: "sql".to_string(),
            restore_path: dir.path().to_path_buf(),
            log_container: Some("sql-logs".to_string()),
            log_restore_path: None,
            mode: RestoreMode::Latest,
            include: Vec::new(),
            exclude: Vec::new(),
        };
        settings.restore.jobs.push(job.clone());
        assert!(settings.validate().is_err());
        assert_eq!(job.log_target(), None);
        job.log_restore_path = Some(dir.path().join("logs"));
        settings.restore.jobs[0] = job.clone();
        assert!(settings.validate().is_ok());
        assert_eq!(job.log_target().map(|(c, _)| c), Some("sql-logs"));
    }

    #[test]
    fn test_relative_local_root_rejected() {
        assert!(local(Path::new("store")).validate().is_err());
    }
}
