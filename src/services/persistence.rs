//! Persistence service — flat-file mirror of the scene store.
//!
//! DESIGN
//! ======
//! The whole store is serialized to one JSON file after every mutation; there
//! is no append log and no diffing. Writes go to `<path>.tmp` and are renamed
//! over the snapshot so a crash mid-write never leaves a truncated file.
//! Each write carries the scene version it was taken at, and a write older
//! than the last one on disk is skipped, so concurrent mutations can finish
//! their I/O in any order without regressing the file.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here is fatal. A missing or corrupt snapshot at startup yields an
//! empty store; a failed write is reported to the caller, which logs it and
//! keeps serving from memory.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::state::SceneObject;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Accepted on-disk layouts. Current writers emit the map; the list form is
/// what early deployments wrote.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Map(HashMap<String, SceneObject>),
    List(Vec<SceneObject>),
}

// =============================================================================
// LOAD
// =============================================================================

/// Load the scene store at startup. Never fails: a missing file starts an
/// empty board, an unreadable or corrupt one is logged and ignored.
#[must_use]
pub fn load_snapshot(path: &Path) -> HashMap<String, SceneObject> {
    match read_snapshot(path) {
        Ok(Some(objects)) => {
            info!(path = %path.display(), count = objects.len(), "loaded scene snapshot");
            objects
        }
        Ok(None) => {
            info!(path = %path.display(), "no scene snapshot found, starting empty");
            HashMap::new()
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "scene snapshot unreadable, starting empty");
            HashMap::new()
        }
    }
}

/// Read and parse a snapshot file. `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_snapshot(path: &Path) -> Result<Option<HashMap<String, SceneObject>>, SnapshotError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let objects = match serde_json::from_str::<SnapshotFile>(&text)? {
        SnapshotFile::Map(map) => map.into_values().collect::<Vec<_>>(),
        SnapshotFile::List(list) => list,
    };

    // Re-key by the object's own id so keys and ids can never disagree.
    Ok(Some(
        objects
            .into_iter()
            .map(|obj| (obj.id().to_owned(), obj))
            .collect(),
    ))
}

// =============================================================================
// WRITE
// =============================================================================

/// Serializes snapshot writes and drops stale ones.
#[derive(Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
    /// Scene version of the newest snapshot on disk.
    written: Mutex<u64>,
}

impl SnapshotWriter {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, written: Mutex::new(0) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot file with `body`, taken at scene `version`.
    /// Returns `false` if a newer snapshot was already written.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be written or renamed.
    pub async fn write(&self, version: u64, body: String) -> Result<bool, SnapshotError> {
        let mut written = self.written.lock().await;
        if version <= *written {
            return Ok(false);
        }

        let tmp = temp_path(&self.path);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *written = version;
        Ok(true)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
