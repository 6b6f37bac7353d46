//! Connection registry — the directory of clients connected to this node.
//!
//! One readers-writer lock guards the map. Critical sections are short and
//! never perform I/O: a "write to a connection" is a channel send to that
//! connection's writer task, so routing holds no lock while bytes move.
//! `snapshot` copies entries out so callers can iterate without the lock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use drift_core::PeerId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("peer {0} is already connected")]
    AlreadyConnected(PeerId),

    #[error("peer {0} not found")]
    NotFound(PeerId),
}

/// The outbound half of one client connection.
///
/// Cloning is cheap; every clone feeds the same writer task. When the last
/// clone drops, the writer drains its queue and closes the transport —
/// that is the single close of the session lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection is closed")]
pub struct ConnectionClosed;

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, msg: Message) -> Result<(), ConnectionClosed> {
        self.tx.send(msg).map_err(|_| ConnectionClosed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionClosed> {
        self.send(Message::text(text.into()))
    }

    /// Serialize a frame and queue it as a text message.
    pub fn send_json<T: serde::Serialize>(&self, frame: &T) -> Result<(), ConnectionClosed> {
        let text = serde_json::to_string(frame).map_err(|_| ConnectionClosed)?;
        self.send_text(text)
    }

    /// Queue a protocol-level liveness probe.
    pub fn send_ping(&self) -> Result<(), ConnectionClosed> {
        self.send(Message::Ping(bytes::Bytes::from_static(b"ping")))
    }

    /// Ask the writer task to close the transport.
    pub fn close(&self) {
        let _ = self.send(Message::Close(None));
    }
}

/// One registered client.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: PeerId,
    pub name: String,
    pub handle: ConnectionHandle,
    pub last_ping: Instant,
    pub last_pong: Instant,
}

/// Directory mapping peer identity → live connection + liveness timestamps.
///
/// At most one entry per identity at a time: a duplicate handshake is
/// rejected, never overwritten.
pub struct Registry {
    entries: RwLock<HashMap<PeerId, RegistryEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PeerId, RegistryEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PeerId, RegistryEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a connection. Both timestamps start at now, so a fresh
    /// entry is never ping-outstanding.
    pub fn add(
        &self,
        id: PeerId,
        name: &str,
        handle: ConnectionHandle,
    ) -> Result<(), RegistryError> {
        let mut entries = self.write();
        if entries.contains_key(&id) {
            return Err(RegistryError::AlreadyConnected(id));
        }
        let now = Instant::now();
        entries.insert(
            id,
            RegistryEntry {
                id,
                name: name.to_string(),
                handle,
                last_ping: now,
                last_pong: now,
            },
        );
        tracing::info!(peer = %id, name, "registered connection");
        Ok(())
    }

    /// Remove an entry, returning it so the caller can close the
    /// connection outside the lock. Idempotent.
    pub fn remove(&self, id: &PeerId) -> Option<RegistryEntry> {
        let removed = self.write().remove(id);
        if let Some(entry) = &removed {
            tracing::info!(peer = %id, name = entry.name, "removed connection");
        }
        removed
    }

    /// Copy out one entry.
    pub fn get(&self, id: &PeerId) -> Result<RegistryEntry, RegistryError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound(*id))
    }

    /// Point-in-time copy of the whole directory. Safe to iterate while
    /// other tasks mutate the registry.
    pub fn snapshot(&self) -> HashMap<PeerId, RegistryEntry> {
        self.read().clone()
    }

    /// Record that a liveness probe was just sent.
    pub fn touch_ping(&self, id: &PeerId) -> Result<(), RegistryError> {
        let mut entries = self.write();
        let entry = entries.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        entry.last_ping = Instant::now();
        Ok(())
    }

    /// Record a liveness acknowledgment, returning the refreshed entry.
    pub fn touch_pong(&self, id: &PeerId) -> Result<RegistryEntry, RegistryError> {
        let mut entries = self.write();
        let entry = entries.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        entry.last_pong = Instant::now();
        Ok(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
