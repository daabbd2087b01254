//! JSON codec for story documents and encrypted envelopes.
//!
//! Output is deterministic: struct fields serialize in declaration order and
//! opaque JSON values keep their key order, so encoding the same document
//! twice yields identical bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::crypto::EncryptedEnvelope;
use super::error::{Result, StoryError};
use crate::graph_utils::graph::{ConnectionRecord, StoryNode};

/// The exact shape written to and read from storage.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedDocument {
    pub nodes: Vec<StoryNode>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

impl SerializedDocument {
    pub fn empty() -> Self {
        Self::default()
    }
}

// serde_json would write NaN/inf as `null`, which `decode` then refuses.
fn ensure_finite(doc: &SerializedDocument) -> Result<()> {
    match doc.nodes.iter().find(|n| !n.position.is_finite()) {
        Some(node) => Err(StoryError::Format(format!("node {} has a non-finite position", node.id))),
        None => Ok(()),
    }
}

/// Compact encoding, used as the plaintext for encryption.
pub fn encode(doc: &SerializedDocument) -> Result<Vec<u8>> {
    ensure_finite(doc)?;
    serde_json::to_vec(doc).map_err(StoryError::format)
}

/// Two-space indented encoding, the layout of unencrypted story files.
pub fn encode_pretty(doc: &SerializedDocument) -> Result<Vec<u8>> {
    ensure_finite(doc)?;
    serde_json::to_vec_pretty(doc).map_err(StoryError::format)
}

pub fn decode(bytes: &[u8]) -> Result<SerializedDocument> {
    let value: Value = serde_json::from_slice(bytes).map_err(StoryError::format)?;
    match value.get("nodes") {
        Some(Value::Array(_)) => {}
        Some(_) => return Err(StoryError::Format("`nodes` is not an array".to_string())),
        None => return Err(StoryError::Format("document has no `nodes` field".to_string())),
    }
    serde_json::from_value(value).map_err(StoryError::format)
}

pub fn encode_envelope(envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(StoryError::format)
}

pub fn decode_envelope(bytes: &[u8]) -> Result<EncryptedEnvelope> {
    let value: Value = serde_json::from_slice(bytes).map_err(StoryError::format)?;
    for field in ["encrypted", "iv"] {
        if value.get(field).is_none() {
            return Err(StoryError::Format(format!("envelope has no `{field}` field")));
        }
    }
    serde_json::from_value(value).map_err(StoryError::format)
}

/// True when `bytes` parse as an object carrying both envelope fields.
pub fn looks_encrypted(bytes: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map.contains_key("encrypted") && map.contains_key("iv"),
        _ => false,
    }
}
