//! JSON file helpers shared by the state store and the development cache.

use crate::error::PersistError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;

/// Reads and deserializes a JSON file. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PersistError::json(path, e))
}

/// Serializes `value` and replaces `path` atomically.
///
/// The JSON is written to a sibling temp file and renamed over the target,
/// so a concurrent reader sees either the old or the new file.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| PersistError::json(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistError::io(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    tokio::fs::write(tmp, &body)
        .await
        .map_err(|e| PersistError::io(tmp, e))?;
    tokio::fs::rename(tmp, path)
        .await
        .map_err(|e| PersistError::io(path, e))
}

/// Removes a file, treating an already missing file as success.
pub async fn remove_file(path: &Path) -> Result<(), PersistError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistError::io(path, e)),
    }
}
