//! WebSocket handler — the board relay.
//!
//! DESIGN
//! ======
//! On upgrade, each transport gets a connection id and an outbound queue,
//! then enters a `select!` loop:
//! - Incoming text frames → parse + dispatch by envelope `type`
//! - Queued frames from peers / the liveness monitor → forward to client
//! - Close token cancelled (eviction, displacement, `close`) → close the
//!   transport, abandoning any send still in flight
//!
//! Handler functions validate, mutate state, and return an `Outcome`. The
//! dispatch layer owns all outbound concerns: reply to sender or broadcast
//! to everyone else.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → connection is pending; nothing is registered yet
//! 2. `join` → identity registered, `joinResponse` carries the snapshot
//! 3. Later packets → dispatch → Outcome (reply / broadcast-to-others)
//! 4. `close`, transport drop, or heartbeat timeout → unregistered
//!
//! ERROR HANDLING
//! ==============
//! A bad packet is logged and dropped; it never closes the connection and
//! never touches the registry or scene store.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, EnvelopeError, PacketType};
use crate::services::{heartbeat, registry, scene};
use crate::state::{AppState, ConnectionHandle};

/// Outbound queue depth per connection. A peer that falls this far behind
/// starts missing broadcasts.
const OUTBOUND_CAPACITY: usize = 256;

/// How long a requested close waits for the close frame to go out.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send to the sender only.
    Reply(Envelope),
    /// Send to every registered participant except the sender.
    BroadcastExcludeSender(Envelope),
    /// Nothing to send.
    Done,
}

#[derive(Debug, thiserror::Error)]
enum RelayError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Scene(#[from] scene::SceneError),
    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-connection relay state.
#[derive(Debug)]
struct Session {
    handle: ConnectionHandle,
    /// Identity id this transport joined as, once it has.
    joined: Option<String>,
}

impl Session {
    fn new(handle: ConnectionHandle) -> Self {
        Self { handle, joined: None }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(OUTBOUND_CAPACITY);
    let mut session = Session::new(ConnectionHandle::new(tx));
    let conn_id = session.handle.conn_id;
    let closed = session.handle.closed.clone();

    info!(%conn_id, "ws: transport accepted");

    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => {
                match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, socket.send(Message::Close(None))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(%conn_id, error = %e, "ws: close frame not sent"),
                    Err(_) => debug!(%conn_id, "ws: close frame timed out"),
                }
                break;
            }
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%conn_id, error = %e, "ws: transport error");
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut session, text.as_str()).await;
                        if send_all(&mut socket, &replies, &closed).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(envelope) = rx.recv() => {
                if send_envelope(&mut socket, &envelope, &closed).await.is_err() {
                    break;
                }
            }
        }
    }

    // Transport went away without (or after) an explicit close. Only the
    // entry still bound to this transport is removed.
    if let Some(id) = registry::lookup_by_conn(&state, conn_id).await {
        if registry::unregister(&state, &id, conn_id).await.is_some() {
            info!(%id, %conn_id, "ws: client disconnected (socket closed)");
        }
    }
    info!(%conn_id, "ws: transport closed");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return envelopes for the
/// sender. Broadcasts are queued on peers as a side effect.
async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Envelope> {
    let conn_id = session.handle.conn_id;
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%conn_id, code = e.error_code(), error = %e, "ws: dropped malformed envelope");
            return vec![];
        }
    };

    let packet = envelope.packet_type();
    debug!(%conn_id, packet = %envelope.kind, from = %envelope.identity.id, "ws: recv packet");

    if !admits(state, session, packet, &envelope).await {
        return vec![];
    }

    let sender = envelope.identity.id.clone();
    let result = match packet {
        PacketType::Join => handle_join(state, session, envelope).await,
        PacketType::Ping => Ok(Outcome::Reply(envelope)),
        PacketType::Pong => {
            if !heartbeat::acknowledge(state, &sender).await {
                debug!(%conn_id, id = %sender, "ws: pong with no outstanding ping");
            }
            Ok(Outcome::Done)
        }
        PacketType::Close => Ok(handle_close(state, session, &sender).await),
        PacketType::DiceRoll => Ok(Outcome::BroadcastExcludeSender(envelope)),
        PacketType::AlterItem | PacketType::AddItem => handle_item(state, envelope).await,
        PacketType::JoinResponse | PacketType::Unknown => {
            warn!(%conn_id, packet = %envelope.kind, "ws: unknown packet type");
            Ok(Outcome::Done)
        }
    };

    match result {
        Ok(Outcome::Reply(reply)) => vec![reply],
        Ok(Outcome::BroadcastExcludeSender(envelope)) => {
            registry::broadcast(state, &envelope, Some(&sender)).await;
            vec![]
        }
        Ok(Outcome::Done) => vec![],
        Err(e) => {
            warn!(%conn_id, id = %sender, error = %e, "ws: packet rejected");
            vec![]
        }
    }
}

/// Join gate: before joining only `join` and `ping` are accepted; after
/// joining, packets must carry the joined identity and this connection must
/// still hold it in the registry. A connection displaced by a newer join
/// loses its identity here.
async fn admits(state: &AppState, session: &mut Session, packet: PacketType, envelope: &Envelope) -> bool {
    let conn_id = session.handle.conn_id;
    if matches!(packet, PacketType::Join | PacketType::Ping) {
        return true;
    }
    let Some(joined) = session.joined.as_deref() else {
        warn!(%conn_id, packet = %envelope.kind, from = %envelope.identity.id, "ws: packet before join dropped");
        return false;
    };
    if joined != envelope.identity.id {
        warn!(%conn_id, %joined, from = %envelope.identity.id, "ws: identity mismatch, packet dropped");
        return false;
    }
    if registry::is_bound(state, joined, conn_id).await {
        return true;
    }
    warn!(%conn_id, id = %joined, packet = %envelope.kind, "ws: identity held by another connection, packet dropped");
    session.joined = None;
    false
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_join(state: &AppState, session: &mut Session, envelope: Envelope) -> Result<Outcome, RelayError> {
    let conn_id = session.handle.conn_id;
    let identity = envelope.identity;

    // Switching identities on one transport releases the old one.
    if let Some(previous) = session.joined.take() {
        if previous != identity.id {
            registry::unregister(state, &previous, conn_id).await;
        }
    }

    // Register before snapshotting so no concurrent mutation is missed.
    let displaced = registry::register(state, identity.clone(), session.handle.clone()).await;
    if let Some(old) = displaced {
        info!(id = %identity.id, old_conn_id = %old.conn_id, %conn_id, "ws: re-join displaced prior connection");
        registry::close(&old);
    }
    session.joined = Some(identity.id.clone());

    let board = scene::snapshot(state).await;
    info!(id = %identity.id, %conn_id, objects = board.len(), "ws: new client joined");
    Ok(Outcome::Reply(Envelope::join_response(identity, &board)?))
}

async fn handle_close(state: &AppState, session: &mut Session, id: &str) -> Outcome {
    session.joined = None;
    if let Some(handle) = registry::unregister(state, id, session.handle.conn_id).await {
        info!(%id, conn_id = %handle.conn_id, "ws: client disconnected");
        registry::close(&handle);
    }
    Outcome::Done
}

/// `addItem` and `alterItem` both carry a whole object; the sender has
/// already applied it locally.
async fn handle_item(state: &AppState, envelope: Envelope) -> Result<Outcome, RelayError> {
    let object = envelope.scene_object()?;
    debug!(packet = %envelope.kind, object_id = %object.id(), kind = object.kind(), "ws: scene mutation");
    scene::upsert(state, object).await?;
    Ok(Outcome::BroadcastExcludeSender(envelope))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_all(socket: &mut WebSocket, envelopes: &[Envelope], closed: &CancellationToken) -> Result<(), ()> {
    for envelope in envelopes {
        send_envelope(socket, envelope, closed).await?;
    }
    Ok(())
}

/// Send one envelope. A close request abandons a send stuck on a peer that
/// stopped reading.
async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope, closed: &CancellationToken) -> Result<(), ()> {
    let text = match envelope.to_text() {
        Ok(text) => text,
        Err(e) => {
            // One unencodable packet is not a reason to drop the transport.
            warn!(packet = %envelope.kind, error = %e, "ws: failed to serialize envelope");
            return Ok(());
        }
    };
    tokio::select! {
        result = socket.send(Message::Text(text.into())) => result.map_err(|e| {
            debug!(packet = %envelope.kind, error = %e, "ws: send failed");
        }),
        () = closed.cancelled() => {
            debug!(packet = %envelope.kind, "ws: send abandoned, close requested");
            Err(())
        }
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
