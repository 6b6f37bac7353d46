//! Participant and node identifiers.
//!
//! A `PeerId` names one chat participant. It is derived from the
//! participant's secp256k1 public key and never changes for the life of
//! that key. A `NodeId` names one relay node and exists only to tag bus
//! envelopes with their origin.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Size of a peer identifier in bytes.
pub const PEER_ID_LEN: usize = 20;

/// Size of a node identifier in bytes.
pub const NODE_ID_LEN: usize = 16;

// hex::FromHexError is PartialEq only, so no Eq here.
#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("expected 0x-prefixed {expected}-char hex string, got {got:?}")]
    BadFormat { expected: usize, got: String },

    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

// ── PeerId ────────────────────────────────────────────────────────────────────

/// Fixed-size public identifier for a chat participant.
///
/// The last 20 bytes of `blake3(uncompressed public key point)` — see
/// [`crate::crypto::SigningIdentity::peer_id`]. Used as the registry key
/// and as the nonce-tracking key; rendered as `0x` + 40 hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("0x").ok_or_else(|| IdentityError::BadFormat {
            expected: PEER_ID_LEN * 2,
            got: s.to_string(),
        })?;
        if hex_part.len() != PEER_ID_LEN * 2 {
            return Err(IdentityError::BadFormat {
                expected: PEER_ID_LEN * 2,
                got: s.to_string(),
            });
        }
        let mut bytes = [0u8; PEER_ID_LEN];
        hex::decode_to_slice(hex_part, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── NodeId ────────────────────────────────────────────────────────────────────

/// Identifier for one relay node in a horizontally-scaled deployment.
///
/// Tags every published [`crate::frame::BusEnvelope`] so the publishing
/// node can discard its own traffic on re-consumption.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Generate a fresh random node id. Called once at node startup.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; NODE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl FromStr for NodeId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != NODE_ID_LEN * 2 {
            return Err(IdentityError::BadFormat {
                expected: NODE_ID_LEN * 2,
                got: s.to_string(),
            });
        }
        let mut bytes = [0u8; NODE_ID_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
