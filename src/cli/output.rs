//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::ApiError;

/// Map domain errors to a message for CLI output, with a next step where one exists.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::RunInProgress(_) => {
            format!("{}\nWait for it to finish or stop it with Ctrl-C.", e)
        }
        ApiError::OutlineIncomplete { .. } => {
            format!("{}\nRun `folio resume` to retry the missing outlines.", e)
        }
        ApiError::ProviderNotConfigured(_) => {
            format!("{}\nCheck the [provider] section of folio.toml.", e)
        }
        _ => e.to_string(),
    }
}

/// Write command output to a file, creating parent directories.
pub fn write_output_file(path: &std::path::Path, content: &str) -> Result<(), ApiError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(crate::error::StorageError::from)?;
    }
    std::fs::write(path, content).map_err(crate::error::StorageError::from)?;
    Ok(())
}
