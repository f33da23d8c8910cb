//! XDG locations for global config and per-workspace data.

use crate::error::ApiError;
use std::path::{Path, PathBuf};

/// `$XDG_CONFIG_HOME`, else the platform config directory.
pub fn config_home() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

/// `$XDG_DATA_HOME`, else the platform data directory.
pub fn data_home() -> Result<PathBuf, ApiError> {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| ApiError::ConfigError("Could not determine a data directory".to_string()))
}

/// Stable short key for a workspace path.
pub fn workspace_key(workspace_root: &Path) -> String {
    let canonical = workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf());
    let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
    hex::encode(&hash.as_bytes()[..8])
}

/// `<data_home>/folio/workspaces/<key>/`
pub fn workspace_data_dir(workspace_root: &Path) -> Result<PathBuf, ApiError> {
    Ok(data_home()?
        .join("folio")
        .join("workspaces")
        .join(workspace_key(workspace_root)))
}
