// Attachment files - path confinement and removal for attachment post types

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Meta key naming an attachment's file, relative to the uploads root
pub const FILE_PATH_KEY: &str = "file_path";

/// Resolve `relative` under `root`, refusing anything that could escape it.
/// Existing files are also checked after symlink resolution.
pub async fn resolve_attachment_path(root: &Path, relative: &str) -> AppResult<PathBuf> {
    let relative_path = Path::new(relative.trim());
    if relative_path.as_os_str().is_empty() {
        return Err(AppError::Validation("Attachment file path is empty".to_string()));
    }
    if relative_path.is_absolute()
        || !relative_path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(AppError::Validation(format!(
            "Attachment file path '{}' must stay inside the uploads directory",
            relative
        )));
    }

    let joined = root.join(relative_path);
    let (canonical_root, canonical_file) =
        match (tokio::fs::canonicalize(root).await, tokio::fs::canonicalize(&joined).await) {
            (Ok(root), Ok(file)) => (root, file),
            // Nothing on disk to escape through
            _ => return Ok(joined),
        };

    if !canonical_file.starts_with(&canonical_root) {
        return Err(AppError::Validation(format!(
            "Attachment file path '{}' resolves outside the uploads directory",
            relative
        )));
    }
    Ok(canonical_file)
}

/// Remove an attachment file after its row is gone. Failures are logged only.
pub async fn remove_attachment(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Removed attachment file");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "Attachment file already missing");
            false
        }
        Err(e) => {
            warn!(path = %path.display(), "Failed to remove attachment file: {}", e);
            false
        }
    }
}
