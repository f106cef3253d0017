//! Fixtures shared by this crate's unit tests.

use kept_config::FolderConfig;
use std::path::Path;
use std::sync::Arc;

/// A `.bak`-only folder writing into the `sql` container.
pub(crate) fn folder(path: &Path) -> Arc<FolderConfig> {
    Arc::new(FolderConfig {
        container: "sql".to_string(),
        path: path.to_path_buf(),
        file_extension: Some(".bak".to_string()),
        remove_on_delete: true,
        compress: false,
    })
}
