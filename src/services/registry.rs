//! Registry service — who is connected, and fan-out to them.
//!
//! DESIGN
//! ======
//! The registry maps an identity id to the transport handle it joined on.
//! It is the only source of broadcast targets. Every removal path (explicit
//! close, transport drop, heartbeat timeout, displacement by a re-join)
//! cancels the entry's pending heartbeat so no deadline task outlives its
//! entry.
//!
//! Delivery is best-effort: frames are queued with `try_send`, and a full
//! or closed queue skips that target without affecting the others.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::{Envelope, Identity};
use crate::state::{AppState, ConnectionHandle, Participant};

// =============================================================================
// REGISTRATION
// =============================================================================

/// Insert or replace the entry for `identity.id`.
///
/// Returns the previous handle when it belonged to a *different*
/// connection, so the caller can decide what to do with the orphan.
pub async fn register(state: &AppState, identity: Identity, handle: ConnectionHandle) -> Option<ConnectionHandle> {
    let mut hub = state.hub.write().await;
    let id = identity.id.clone();
    let conn_id = handle.conn_id;
    let previous = hub
        .participants
        .insert(id.clone(), Participant { identity, handle, pending: None });

    let displaced = previous.and_then(|mut old| {
        old.cancel_heartbeat();
        (old.handle.conn_id != conn_id).then_some(old.handle)
    });

    info!(%id, %conn_id, participants = hub.participants.len(), "registry: registered");
    displaced
}

/// Remove the entry for `id` if it is still bound to `conn_id`. Idempotent;
/// an entry that a newer join has taken over is left alone.
pub async fn unregister(state: &AppState, id: &str, conn_id: Uuid) -> Option<ConnectionHandle> {
    let mut hub = state.hub.write().await;
    if hub.participants.get(id).map(|p| p.handle.conn_id) != Some(conn_id) {
        return None;
    }
    let mut participant = hub.participants.remove(id)?;
    participant.cancel_heartbeat();
    info!(%id, %conn_id, participants = hub.participants.len(), "registry: unregistered");
    Some(participant.handle)
}

/// Whether the entry for `id` is still bound to `conn_id`.
pub async fn is_bound(state: &AppState, id: &str, conn_id: Uuid) -> bool {
    let hub = state.hub.read().await;
    hub.participants.get(id).is_some_and(|p| p.handle.conn_id == conn_id)
}

/// Reverse lookup from a transport to the identity registered on it.
/// `None` is the normal answer for a transport that never joined or was
/// already removed.
pub async fn lookup_by_conn(state: &AppState, conn_id: Uuid) -> Option<String> {
    let hub = state.hub.read().await;
    hub.participants
        .iter()
        .find(|(_, p)| p.handle.conn_id == conn_id)
        .map(|(id, _)| id.clone())
}

// =============================================================================
// FAN-OUT TARGETS
// =============================================================================

pub async fn all_handles(state: &AppState) -> Vec<ConnectionHandle> {
    let hub = state.hub.read().await;
    hub.participants.values().map(|p| p.handle.clone()).collect()
}

pub async fn handles_except(state: &AppState, id: &str) -> Vec<ConnectionHandle> {
    let hub = state.hub.read().await;
    hub.participants
        .iter()
        .filter(|(other, _)| other.as_str() != id)
        .map(|(_, p)| p.handle.clone())
        .collect()
}

pub async fn participant_count(state: &AppState) -> usize {
    state.hub.read().await.participants.len()
}

// =============================================================================
// DELIVERY
// =============================================================================

/// Queue `envelope` for every registered participant, optionally excluding
/// one identity. Returns how many targets accepted it.
pub async fn broadcast(state: &AppState, envelope: &Envelope, exclude: Option<&str>) -> usize {
    let targets = match exclude {
        Some(id) => handles_except(state, id).await,
        None => all_handles(state).await,
    };

    let delivered = targets
        .iter()
        .filter(|handle| send(handle, envelope.clone()))
        .count();
    debug!(packet = %envelope.kind, from = %envelope.identity.id, targets = targets.len(), delivered, "registry: broadcast");
    delivered
}

/// Queue one envelope for a connection.
pub fn send(handle: &ConnectionHandle, envelope: Envelope) -> bool {
    match handle.tx.try_send(envelope) {
        Ok(()) => true,
        Err(e) => {
            debug!(conn_id = %handle.conn_id, error = %e, "registry: delivery skipped");
            false
        }
    }
}

/// Ask a connection to close its transport. Safe on an already-gone peer
/// and idempotent.
pub fn close(handle: &ConnectionHandle) {
    if handle.closed.is_cancelled() {
        debug!(conn_id = %handle.conn_id, "registry: close already requested");
        return;
    }
    handle.closed.cancel();
    if handle.tx.is_closed() {
        warn!(conn_id = %handle.conn_id, "registry: close requested on a vanished connection");
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
