// suppliersync/src/utils/artifacts.rs
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{Result, SyncError};

/// Creates the local directory downloaded invoice PDFs are staged in.
pub fn prepare_artifact_dir(dir: &Path) -> Result<PathBuf> {
    if dir.as_os_str().is_empty() {
        return Err(SyncError::ConfigInvalid(
            "PDF_STORAGE_DIR cannot be empty".to_string(),
        ));
    }
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        tracing::info!(dir = %dir.display(), "created PDF storage directory");
    } else if !dir.is_dir() {
        return Err(SyncError::ConfigInvalid(format!(
            "PDF_STORAGE_DIR {} exists and is not a directory",
            dir.display()
        )));
    }
    Ok(dir.to_path_buf())
}

/// File name a downloaded invoice PDF is stored under.
///
/// Anything outside `[A-Za-z0-9_-]` in the id becomes `_` so an upstream id
/// can never escape the storage directory.
pub fn document_file_name(invoice_id: &str) -> String {
    let safe: String = invoice_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("invoice_{safe}.pdf")
}
