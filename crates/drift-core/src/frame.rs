//! Wire frames — the JSON payloads exchanged over websocket text frames
//! and over the cross-node bus.
//!
//! Binary chat payloads (ciphertext after a `/key` exchange) are
//! hex-encoded on the wire. The handshake greeting, welcome, and rejection
//! lines are literal strings, not JSON.

use serde::{Deserialize, Serialize};

use crate::crypto::FrameSignature;
use crate::identity::{NodeId, PeerId};

/// First frame the server sends on every new connection.
pub const GREETING: &str = "Hello";

/// Literal rejection line for a second handshake on an already-registered
/// identity. The existing connection is kept; the new one is closed.
pub const ALREADY_CONNECTED: &str = "Already connected";

/// Handshake acknowledgment sent once the registry entry exists.
pub fn welcome(name: &str) -> String {
    format!("Welcome, {name}")
}

// ── Client → server ───────────────────────────────────────────────────────────

/// Identity declaration — the one frame a client must send during the
/// handshake window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeFrame {
    pub id: PeerId,
    pub name: String,
}

/// A chat message in flight from a client to its node.
///
/// The node routes on `to_id` alone; the signature and nonce are carried
/// through untouched for the recipient's client to validate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFrame {
    #[serde(rename = "toID")]
    pub to_id: PeerId,
    #[serde(with = "hex_bytes")]
    pub text: Vec<u8>,
    #[serde(rename = "fromNonce")]
    pub from_nonce: u64,
    pub encrypted: bool,
    #[serde(flatten)]
    pub signature: FrameSignature,
}

// ── Server → client ───────────────────────────────────────────────────────────

/// Who a delivery came from, including the sender's nonce for this pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub id: PeerId,
    pub name: String,
    pub nonce: u64,
}

/// A chat message delivered to its recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFrame {
    pub from: Sender,
    #[serde(with = "hex_bytes")]
    pub text: Vec<u8>,
    pub encrypted: bool,
    #[serde(flatten)]
    pub signature: FrameSignature,
}

// ── Node ↔ node ───────────────────────────────────────────────────────────────

/// A message republished onto the shared bus because its recipient was not
/// connected to the publishing node.
///
/// `origin` tags the publishing node: the bus fans out to every subscriber
/// including the publisher, and the publisher discards its own envelopes on
/// re-consumption. Origin tagging, not sender-identity comparison, is what
/// keeps multi-node fan-out loop-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(rename = "originID")]
    pub origin: NodeId,
    #[serde(rename = "fromID")]
    pub from_id: PeerId,
    #[serde(rename = "fromName")]
    pub from_name: String,
    #[serde(rename = "toID")]
    pub to_id: PeerId,
    #[serde(with = "hex_bytes")]
    pub text: Vec<u8>,
    #[serde(rename = "fromNonce")]
    pub from_nonce: u64,
    pub encrypted: bool,
    #[serde(flatten)]
    pub signature: FrameSignature,
}

impl BusEnvelope {
    /// Build the envelope the router publishes when `to_id` is not local.
    pub fn from_chat(origin: NodeId, from_id: PeerId, from_name: &str, chat: ChatFrame) -> Self {
        Self {
            origin,
            from_id,
            from_name: from_name.to_string(),
            to_id: chat.to_id,
            text: chat.text,
            from_nonce: chat.from_nonce,
            encrypted: chat.encrypted,
            signature: chat.signature,
        }
    }

    /// Build the delivery frame for the consuming node's local recipient.
    pub fn into_delivery(self) -> DeliveryFrame {
        DeliveryFrame {
            from: Sender {
                id: self.from_id,
                name: self.from_name,
                nonce: self.from_nonce,
            },
            text: self.text,
            encrypted: self.encrypted,
            signature: self.signature,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
