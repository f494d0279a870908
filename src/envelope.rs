//! Envelope — the JSON packet exchanged with board clients.
//!
//! ARCHITECTURE
//! ============
//! Every websocket text frame carries one envelope:
//! `{type, identity: {id, name?}, payload?}`. The relay routes on `type`
//! and treats `payload` as opaque except for `addItem` / `alterItem`,
//! whose `payload.object` is applied to the scene store.
//!
//! DESIGN
//! ======
//! Inbound text goes through `Envelope::parse`, a typed validate step that
//! returns an `EnvelopeError` instead of throwing. The dispatcher only ever
//! sees envelopes that have a `type` and a non-empty `identity.id`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::SceneObject;

// =============================================================================
// TYPES
// =============================================================================

/// Client-generated participant identifier. Unique only among the
/// participants connected at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Packet discriminator. Unrecognized tags map to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Join,
    JoinResponse,
    Ping,
    Pong,
    Close,
    DiceRoll,
    AlterItem,
    AddItem,
    Unknown,
}

impl PacketType {
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "join" => Self::Join,
            "joinResponse" => Self::JoinResponse,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "close" => Self::Close,
            "diceRoll" => Self::DiceRoll,
            "alterItem" => Self::AlterItem,
            "addItem" => Self::AddItem,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub identity: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("envelope is not a json object")]
    NotAnObject,
    #[error("envelope missing `type`")]
    MissingType,
    #[error("envelope missing `identity`")]
    MissingIdentity,
    #[error("{packet} payload missing `object`")]
    MissingObject { packet: String },
    #[error("invalid scene object: {0}")]
    InvalidObject(serde_json::Error),
}

impl EnvelopeError {
    /// Grepable code for log lines.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "E_INVALID_JSON",
            Self::NotAnObject => "E_NOT_OBJECT",
            Self::MissingType => "E_MISSING_TYPE",
            Self::MissingIdentity => "E_MISSING_IDENTITY",
            Self::MissingObject { .. } => "E_MISSING_OBJECT",
            Self::InvalidObject(_) => "E_INVALID_OBJECT",
        }
    }
}

// =============================================================================
// PARSING
// =============================================================================

impl Envelope {
    /// Parse and validate one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON, is not an object, or lacks
    /// a string `type` or an `identity` with a non-empty `id`.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut map) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let Some(Value::String(kind)) = map.remove("type") else {
            return Err(EnvelopeError::MissingType);
        };

        let identity = map
            .remove("identity")
            .and_then(|v| serde_json::from_value::<Identity>(v).ok())
            .filter(|identity| !identity.id.is_empty())
            .ok_or(EnvelopeError::MissingIdentity)?;

        Ok(Self { kind, identity, payload: map.remove("payload") })
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        PacketType::from_tag(&self.kind)
    }

    /// Extract `payload.object` as a scene object.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload has no `object` or it does not
    /// describe a known object variant.
    pub fn scene_object(&self) -> Result<SceneObject, EnvelopeError> {
        let object = self
            .payload
            .as_ref()
            .and_then(|payload| payload.get("object"))
            .ok_or_else(|| EnvelopeError::MissingObject { packet: self.kind.clone() })?;
        serde_json::from_value(object.clone()).map_err(EnvelopeError::InvalidObject)
    }

    /// Serialize for a websocket text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Envelope {
    /// Reply to a join with the full scene snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be converted to JSON.
    pub fn join_response(identity: Identity, board: &HashMap<String, SceneObject>) -> Result<Self, serde_json::Error> {
        let mut payload = serde_json::Map::new();
        payload.insert("boardInformation".into(), serde_json::to_value(board)?);
        Ok(Self { kind: "joinResponse".into(), identity, payload: Some(Value::Object(payload)) })
    }

    /// Server-initiated heartbeat probe addressed to `id`.
    #[must_use]
    pub fn ping(id: &str) -> Self {
        Self { kind: "ping".into(), identity: Identity { id: id.into(), name: None }, payload: None }
    }
}

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;
