//! drift-client — the client half of the authenticated messaging protocol.
//!
//! The relay routes frames without inspecting them; everything that makes
//! a conversation trustworthy lives here: signing outbound frames over the
//! `{recipient, payload, nonce}` tuple, verifying inbound signatures by
//! recovery, strict nonce ordering per sender, and the in-band `/key`
//! exchange that upgrades a pair of peers to encrypted payloads.

pub mod client;
pub mod command;
pub mod store;

pub use client::{Client, ClientError, ClientEvent};
pub use store::{Contact, ContactStore, MemoryContacts, SqliteContacts, StoreError};
