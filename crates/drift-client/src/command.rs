//! Chat command sub-protocol.
//!
//! Text beginning with `/` is a command, never an ordinary message. Two
//! commands exist: `/share key`, which the sender's client expands into a
//! `/key <material>` transmission, and `/key <material>` itself, which the
//! recipient's client intercepts to store the sender's encryption key.
//! Malformed commands are errors and are never transmitted.

use thiserror::Error;

/// Reserved command prefix.
pub const PREFIX: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/share key` — send our encryption public key to the recipient.
    ShareKey,
    /// `/key <material>` — carry 64 hex chars of X25519 public key.
    Key(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),

    #[error("usage: /share key")]
    ShareUsage,

    #[error("/key expects 64 hex characters of key material")]
    KeyUsage,
}

/// Parse chat input. `Ok(None)` means ordinary text, not a command.
pub fn parse(input: &str) -> Result<Option<Command>, CommandError> {
    if !input.starts_with(PREFIX) {
        return Ok(None);
    }
    let mut words = input.split_whitespace();
    let verb = words.next().unwrap_or(input);
    match verb {
        "/share" => match (words.next(), words.next()) {
            (Some("key"), None) => Ok(Some(Command::ShareKey)),
            _ => Err(CommandError::ShareUsage),
        },
        "/key" => match (words.next(), words.next()) {
            (Some(material), None)
                if material.len() == 64 && material.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Ok(Some(Command::Key(material.to_string())))
            }
            _ => Err(CommandError::KeyUsage),
        },
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
