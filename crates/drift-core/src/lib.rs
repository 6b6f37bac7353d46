//! drift-core — shared types, wire frames, and cryptographic primitives.
//! All other drift crates depend on this one.

pub mod config;
pub mod crypto;
pub mod frame;
pub mod identity;

pub use frame::{BusEnvelope, ChatFrame, DeliveryFrame, HandshakeFrame, Sender};
pub use identity::{NodeId, PeerId};
