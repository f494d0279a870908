//! Heartbeat service — detects and evicts dead connections.
//!
//! DESIGN
//! ======
//! A background task ticks every `heartbeat_interval`. On each tick, every
//! registered participant without an outstanding probe is sent a `ping`
//! and given a deadline task that fires after `heartbeat_timeout`. A
//! matching `pong` aborts the deadline; if the deadline fires first the
//! participant is unregistered and its transport is asked to close.
//!
//! A participant with an outstanding probe is never pinged again until it
//! resolves. Each probe carries a sequence number and the connection id it
//! was sent on, so a deadline that loses a race with a pong or a re-join
//! finds nothing to evict.
//!
//! This is the only way half-open transports (killed client processes,
//! dropped networks) leave the registry.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::services::registry;
use crate::state::{AppState, PendingHeartbeat};

/// Spawn the liveness monitor. Runs for the life of the process.
pub fn spawn_liveness_monitor(state: AppState) -> JoinHandle<()> {
    let period = state.config.heartbeat_interval;
    info!(
        interval = ?period,
        timeout = ?state.config.heartbeat_timeout,
        "heartbeat: liveness monitor started"
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; probe one period after start.
        interval.tick().await;
        loop {
            interval.tick().await;
            probe_idle(&state).await;
        }
    })
}

/// Ping every participant that has no outstanding heartbeat. Returns the
/// number of pings sent.
pub async fn probe_idle(state: &AppState) -> usize {
    let timeout = state.config.heartbeat_timeout;
    let mut hub = state.hub.write().await;
    let total = hub.participants.len();
    let mut probed = 0;

    let idle: Vec<String> = hub
        .participants
        .iter()
        .filter(|(_, p)| p.pending.is_none())
        .map(|(id, _)| id.clone())
        .collect();

    for id in idle {
        hub.heartbeat_seq += 1;
        let seq = hub.heartbeat_seq;
        let Some(participant) = hub.participants.get_mut(&id) else {
            continue;
        };

        let conn_id = participant.handle.conn_id;
        // A failed send still arms the deadline.
        registry::send(&participant.handle, Envelope::ping(&id));
        let deadline = tokio::spawn(expire_after(state.clone(), id.clone(), conn_id, seq, timeout));
        participant.pending = Some(PendingHeartbeat { seq, deadline: deadline.abort_handle() });
        debug!(%id, %conn_id, seq, "heartbeat: ping sent");
        probed += 1;
    }

    if probed < total {
        debug!(waiting = total - probed, "heartbeat: participants still awaiting pong");
    }
    probed
}

/// Resolve the outstanding heartbeat for `id`. Returns `false` when there
/// was nothing pending (late or unsolicited pong).
pub async fn acknowledge(state: &AppState, id: &str) -> bool {
    let mut hub = state.hub.write().await;
    let Some(participant) = hub.participants.get_mut(id) else {
        return false;
    };
    if participant.pending.is_none() {
        return false;
    }
    participant.cancel_heartbeat();
    debug!(%id, "heartbeat: pong received");
    true
}

/// Number of participants with a probe in flight.
pub async fn pending_count(state: &AppState) -> usize {
    let hub = state.hub.read().await;
    hub.participants
        .values()
        .filter(|p| p.pending.is_some())
        .count()
}

async fn expire_after(state: AppState, id: String, conn_id: Uuid, seq: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    expire(&state, &id, conn_id, seq).await;
}

/// Evict `id` if the probe `seq` sent on `conn_id` is still unanswered.
pub async fn expire(state: &AppState, id: &str, conn_id: Uuid, seq: u64) -> bool {
    let participant = {
        let mut hub = state.hub.write().await;
        let still_pending = hub.participants.get(id).is_some_and(|p| {
            p.handle.conn_id == conn_id && p.pending.as_ref().is_some_and(|pending| pending.seq == seq)
        });
        if !still_pending {
            return false;
        }
        // The deadline task is the caller; drop the marker without aborting it.
        match hub.participants.remove(id) {
            Some(participant) => participant,
            None => return false,
        }
    };

    info!(%id, name = ?participant.identity.name, %conn_id, seq, "heartbeat: ping timeout, client evicted");
    registry::close(&participant.handle);
    true
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
