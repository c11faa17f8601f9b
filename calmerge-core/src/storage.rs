//! JSON persistence with atomic replace.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{CalMergeError, CalMergeResult};

/// Write `content` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> CalMergeResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");

    std::fs::write(&temp, content)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> CalMergeResult<()> {
    let mut content = serde_json::to_vec_pretty(value)
        .map_err(|e| CalMergeError::Serialization(e.to_string()))?;
    content.push(b'\n');
    write_atomic(path, &content)
}

/// Read a JSON file, `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CalMergeResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CalMergeError::Storage(format!("{}: {e}", path.display())))
}

/// Like [`read_json`], but an unreadable file is logged and treated as absent.
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    match read_json(path) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring unreadable file {}: {e}", path.display());
            None
        }
    }
}
