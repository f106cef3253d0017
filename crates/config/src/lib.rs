//! Configuration for kept.
//!
//! Settings are layered with `figment`: built-in defaults, then a config file
//! (TOML, YAML or JSON, picked by extension), then `KEPT_`-prefixed
//! environment variables with `__` separating nested keys, e.g.
//! `KEPT_BACKUP__POLL_INTERVAL_MS=500`.

pub mod error;
mod settings;

pub use crate::settings::{
    BackupSettings, BasicRestoreFilter, BasicRestoreJob, FolderConfig, RestoreJob, RestoreMode, RestoreSettings,
    RetentionConfig, RetentionSettings, Settings, StoreSettings,
};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "KEPT_";
const DEFAULT_FILE_NAME: &str = "kept.toml";

/// Config file used when none is given explicitly, in the platform's config
/// directory (e.g. `~/.config/kept/kept.toml`).
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "kept").map(|dirs| dirs.config_dir().join(DEFAULT_FILE_NAME))
}

fn file_provider(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

/// Build the layered figment without extracting it.
///
/// An explicit `path` must exist; the default path is optional.
pub fn figment(path: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    match path {
        Some(path) => {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = file_provider(figment, path)?;
        },
        None => {
            if let Some(path) = default_path().filter(|path| path.is_file()) {
                tracing::debug!(path = %path.display(), "Using default configuration file");
                figment = file_provider(figment, &path)?;
            }
        },
    }
    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// Load, normalize and validate settings.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let mut settings: Settings = figment(path)?.extract().or_raise(|| ErrorKind::Malformed)?;
    settings.normalize();
    settings.validate()?;
    tracing::debug!(
        folders = settings.backup.folders.len(),
        retention = settings.retention.folders.len(),
        restore_jobs = settings.restore.jobs.len(),
        basic_restore_jobs = settings.restore.basic.len(),
        "Loaded configuration"
    );
    Ok(settings)
}
