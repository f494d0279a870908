//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into background tasks. All mutable session data (the connection
//! registry, per-connection heartbeat markers, and the scene store) lives in
//! a single `Hub` behind one `RwLock`, so that lock is the only serialization
//! point for relay traffic. The snapshot writer sits beside it so disk I/O
//! happens after the hub lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::envelope::{Envelope, Identity};
use crate::services::persistence::SnapshotWriter;

// =============================================================================
// SCENE OBJECT
// =============================================================================

/// One visual object on the board. The `type` tag is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SceneObject {
    Image(ImageObject),
    Text(TextObject),
    #[serde(rename = "svg")]
    FreehandPath(PathObject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageObject {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub width: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub height: f64,
    pub src: String,
    #[serde(default)]
    pub is_grid: bool,
    /// Client fields this server does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextObject {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub width: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub height: f64,
    pub text: String,
    #[serde(default = "default_font_size", deserialize_with = "lenient_font_size")]
    pub font_size: f64,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub background_color: String,
    #[serde(default = "default_scale", deserialize_with = "lenient_scale")]
    pub scale: f64,
    #[serde(default)]
    pub is_bold: bool,
    #[serde(default)]
    pub is_italic: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathObject {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub x: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub y: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub width: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub height: f64,
    /// SVG path data (`d` attribute).
    pub path_value: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SceneObject {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Image(o) => &o.id,
            Self::Text(o) => &o.id,
            Self::FreehandPath(o) => &o.id,
        }
    }

    /// Wire tag of this variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Text(_) => "text",
            Self::FreehandPath(_) => "svg",
        }
    }
}

fn default_font_size() -> f64 {
    16.0
}

fn default_scale() -> f64 {
    1.0
}

/// Geometry arrives as a JSON number, a numeric string (older clients stored
/// element datasets verbatim), or `null` when the client measured an element
/// before layout and serialized `NaN`. Anything that is not a finite number
/// becomes 0 so the object is still stored and relayed.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    number_or(deserializer, 0.0)
}

fn lenient_font_size<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    number_or(deserializer, default_font_size())
}

fn lenient_scale<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    number_or(deserializer, default_scale())
}

fn number_or<'de, D>(deserializer: D, fallback: f64) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => None,
        },
        _ => None,
    };
    // Non-finite values would serialize as `null` and poison the snapshot.
    Ok(parsed.filter(|n| n.is_finite()).unwrap_or(fallback))
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Transport handle stored in the registry. `conn_id` identifies the
/// underlying socket independently of whichever identity joined on it.
/// Envelopes are queued on `tx`; `closed` asks the connection loop to shut
/// the transport and is never lost to a full queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<Envelope>,
    pub closed: CancellationToken,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { conn_id: Uuid::new_v4(), tx, closed: CancellationToken::new() }
    }
}

/// An outstanding ping awaiting its pong.
#[derive(Debug)]
pub struct PendingHeartbeat {
    pub seq: u64,
    /// Cancels the deadline task.
    pub deadline: AbortHandle,
}

/// Registry entry for one joined participant.
#[derive(Debug)]
pub struct Participant {
    pub identity: Identity,
    pub handle: ConnectionHandle,
    pub pending: Option<PendingHeartbeat>,
}

impl Participant {
    /// Cancel the deadline timer, if any.
    pub fn cancel_heartbeat(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.deadline.abort();
        }
    }
}

// =============================================================================
// HUB
// =============================================================================

/// Everything relay traffic mutates. Guarded as a unit by `AppState::hub`.
#[derive(Debug, Default)]
pub struct Hub {
    /// Connection registry: identity id -> participant.
    pub participants: HashMap<String, Participant>,
    /// Scene store: object id -> object.
    pub objects: HashMap<String, SceneObject>,
    /// Bumped on every scene mutation; orders snapshot writes.
    pub scene_version: u64,
    /// Source of heartbeat sequence numbers.
    pub heartbeat_seq: u64,
}

impl Hub {
    #[must_use]
    pub fn with_objects(objects: HashMap<String, SceneObject>) -> Self {
        Self { objects, ..Self::default() }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum; all inner fields
/// are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RwLock<Hub>>,
    pub snapshots: Arc<SnapshotWriter>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, objects: HashMap<String, SceneObject>) -> Self {
        let snapshots = SnapshotWriter::new(config.snapshot_path.clone());
        Self {
            hub: Arc::new(RwLock::new(Hub::with_objects(objects))),
            snapshots: Arc::new(snapshots),
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
