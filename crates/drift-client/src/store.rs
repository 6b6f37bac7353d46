//! Contact store — per-peer protocol state the client persists.
//!
//! One record per peer: display name, the outgoing and incoming nonce
//! counters that give each direction of a conversation its strict
//! ordering, and the peer's encryption key once a `/key` exchange has
//! happened. `MemoryContacts` backs tests; `SqliteContacts` is the
//! on-disk store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use drift_core::PeerId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("contact {0} not found")]
    NotFound(PeerId),

    #[error("storage failure: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// One peer's persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: PeerId,
    pub name: String,
    /// Last nonce we sent to this peer. Next outbound frame carries +1.
    pub outgoing_nonce: u64,
    /// Last nonce accepted from this peer. Next inbound frame must be +1.
    pub incoming_nonce: u64,
    /// The peer's X25519 public key, once shared via `/key`.
    pub key: Option<[u8; 32]>,
}

impl Contact {
    /// Fresh record for a peer we have never exchanged messages with.
    pub fn new(id: PeerId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            outgoing_nonce: 0,
            incoming_nonce: 0,
            key: None,
        }
    }
}

pub trait ContactStore: Send + Sync {
    fn lookup(&self, id: &PeerId) -> Result<Option<Contact>, StoreError>;
    fn add(&self, contact: Contact) -> Result<(), StoreError>;
    fn update_incoming_nonce(&self, id: &PeerId, nonce: u64) -> Result<(), StoreError>;
    fn update_outgoing_nonce(&self, id: &PeerId, nonce: u64) -> Result<(), StoreError>;
    fn update_key(&self, id: &PeerId, key: [u8; 32]) -> Result<(), StoreError>;
    fn all(&self) -> Result<Vec<Contact>, StoreError>;
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryContacts {
    contacts: Mutex<HashMap<PeerId, Contact>>,
}

impl MemoryContacts {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(
        &self,
        id: &PeerId,
        f: impl FnOnce(&mut Contact) -> T,
    ) -> Result<T, StoreError> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        contacts
            .get_mut(id)
            .map(f)
            .ok_or(StoreError::NotFound(*id))
    }
}

impl ContactStore for MemoryContacts {
    fn lookup(&self, id: &PeerId) -> Result<Option<Contact>, StoreError> {
        let contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(contacts.get(id).cloned())
    }

    fn add(&self, contact: Contact) -> Result<(), StoreError> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        contacts.entry(contact.id).or_insert(contact);
        Ok(())
    }

    fn update_incoming_nonce(&self, id: &PeerId, nonce: u64) -> Result<(), StoreError> {
        self.with(id, |c| c.incoming_nonce = nonce)
    }

    fn update_outgoing_nonce(&self, id: &PeerId, nonce: u64) -> Result<(), StoreError> {
        self.with(id, |c| c.outgoing_nonce = nonce)
    }

    fn update_key(&self, id: &PeerId, key: [u8; 32]) -> Result<(), StoreError> {
        self.with(id, |c| c.key = Some(key))
    }

    fn all(&self) -> Result<Vec<Contact>, StoreError> {
        let contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(contacts.values().cloned().collect())
    }
}

// ── Sqlite store ──────────────────────────────────────────────────────────────

pub struct SqliteContacts {
    conn: Mutex<Connection>,
}

impl SqliteContacts {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS contacts (
                id             TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                outgoing_nonce INTEGER NOT NULL DEFAULT 0,
                incoming_nonce INTEGER NOT NULL DEFAULT 0,
                key            BLOB
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touched(&self, id: &PeerId, rows: usize) -> Result<(), StoreError> {
        if rows == 0 {
            Err(StoreError::NotFound(*id))
        } else {
            Ok(())
        }
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let id: String = row.get(0)?;
    let id = id.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let key: Option<Vec<u8>> = row.get(4)?;
    let key = match key {
        Some(bytes) => Some(bytes.try_into().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Blob,
                "key is not 32 bytes".into(),
            )
        })?),
        None => None,
    };
    Ok(Contact {
        id,
        name: row.get(1)?,
        outgoing_nonce: row.get::<_, i64>(2)? as u64,
        incoming_nonce: row.get::<_, i64>(3)? as u64,
        key,
    })
}

impl ContactStore for SqliteContacts {
    fn lookup(&self, id: &PeerId) -> Result<Option<Contact>, StoreError> {
        let conn = self.conn();
        let contact = conn
            .query_row(
                "SELECT id, name, outgoing_nonce, incoming_nonce, key
                 FROM contacts WHERE id = ?1",
                params![id.to_string()],
                row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    fn add(&self, contact: Contact) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO contacts (id, name, outgoing_nonce, incoming_nonce, key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                contact.id.to_string(),
                contact.name,
                contact.outgoing_nonce as i64,
                contact.incoming_nonce as i64,
                contact.key.as_ref().map(|k| k.to_vec()),
            ],
        )?;
        Ok(())
    }

    fn update_incoming_nonce(&self, id: &PeerId, nonce: u64) -> Result<(), StoreError> {
        let rows = self.conn().execute(
            "UPDATE contacts SET incoming_nonce = ?2 WHERE id = ?1",
            params![id.to_string(), nonce as i64],
        )?;
        self.touched(id, rows)
    }

    fn update_outgoing_nonce(&self, id: &PeerId, nonce: u64) -> Result<(), StoreError> {
        let rows = self.conn().execute(
            "UPDATE contacts SET outgoing_nonce = ?2 WHERE id = ?1",
            params![id.to_string(), nonce as i64],
        )?;
        self.touched(id, rows)
    }

    fn update_key(&self, id: &PeerId, key: [u8; 32]) -> Result<(), StoreError> {
        let rows = self.conn().execute(
            "UPDATE contacts SET key = ?2 WHERE id = ?1",
            params![id.to_string(), key.to_vec()],
        )?;
        self.touched(id, rows)
    }

    fn all(&self) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, outgoing_nonce, incoming_nonce, key
             FROM contacts ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_contact)?;
        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
