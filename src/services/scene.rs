//! Scene service — the authoritative board state.
//!
//! DESIGN
//! ======
//! Objects are keyed by their client-assigned id and replaced wholesale on
//! every mutation (last write wins). The variant tag of an id is fixed by
//! its first insert. After each accepted mutation the full store is
//! serialized under the hub lock, then written to disk after the lock is
//! released so snapshot I/O never stalls other connections.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::state::{AppState, SceneObject};

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("scene object id must not be empty")]
    EmptyId,
    #[error("object {id} is a {existing}, cannot replace it with a {incoming}")]
    VariantChanged { id: String, existing: &'static str, incoming: &'static str },
}

/// Clone the full current mapping.
pub async fn snapshot(state: &AppState) -> HashMap<String, SceneObject> {
    state.hub.read().await.objects.clone()
}

/// Insert or replace `object`, then flush the whole store to the snapshot
/// file. A failed flush is logged; memory stays authoritative.
///
/// # Errors
///
/// Returns an error if the id is empty or the object would change the
/// variant of an existing id.
pub async fn upsert(state: &AppState, object: SceneObject) -> Result<(), SceneError> {
    if object.id().is_empty() {
        return Err(SceneError::EmptyId);
    }

    let (version, body) = {
        let mut hub = state.hub.write().await;
        if let Some(existing) = hub.objects.get(object.id()) {
            if existing.kind() != object.kind() {
                return Err(SceneError::VariantChanged {
                    id: object.id().to_owned(),
                    existing: existing.kind(),
                    incoming: object.kind(),
                });
            }
        }

        hub.objects.insert(object.id().to_owned(), object);
        hub.scene_version += 1;
        (hub.scene_version, serde_json::to_string(&hub.objects))
    };

    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, version, "scene: snapshot serialization failed");
            return Ok(());
        }
    };

    match state.snapshots.write(version, body).await {
        Ok(true) => debug!(version, path = %state.snapshots.path().display(), "scene: snapshot written"),
        Ok(false) => debug!(version, "scene: newer snapshot already on disk"),
        Err(e) => error!(error = %e, version, "scene: snapshot write failed"),
    }
    Ok(())
}

/// Number of objects currently on the board.
pub async fn object_count(state: &AppState) -> usize {
    state.hub.read().await.objects.len()
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod tests;
