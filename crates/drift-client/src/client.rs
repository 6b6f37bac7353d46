//! Client connection and the authenticated messaging pipelines.
//!
//! Outbound: command expansion, optional encryption, signing, transmit,
//! then persist the nonce. Inbound: contact auto-add, signature
//! verification by recovery, strict nonce ordering, optional decryption,
//! `/key` interception. Anything the pipeline rejects is dropped with a
//! system event; rejection never advances stored state.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use drift_core::crypto::{
    parse_public_key, seal, CryptoError, EncryptionIdentity, SigningIdentity,
};
use drift_core::frame::{ChatFrame, DeliveryFrame, HandshakeFrame, ALREADY_CONNECTED, GREETING};
use drift_core::PeerId;

use crate::command::{self, Command, CommandError};
use crate::store::{Contact, ContactStore, StoreError};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] WsError),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("this identity is already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// What the protocol surfaces to the UI. Everything a user sees arrives
/// through this channel; the pipelines never print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Protocol chatter: welcome line, rejections, key-exchange notices.
    System(String),
    /// A verified, in-order chat message.
    Message {
        from: PeerId,
        name: String,
        text: String,
    },
    /// First contact with a previously unknown peer.
    ContactAdded { id: PeerId, name: String },
    /// A `/key` exchange updated the stored key for a peer.
    KeyUpdated { id: PeerId },
    /// The connection is gone; no further events will arrive.
    Disconnected,
}

/// A connected chat client.
pub struct Client {
    id: PeerId,
    name: String,
    signer: Arc<SigningIdentity>,
    encryption: Arc<EncryptionIdentity>,
    store: Arc<dyn ContactStore>,
    sink: Arc<Mutex<WsSink>>,
    listener: JoinHandle<()>,
}

impl Client {
    /// Dial the relay and run the handshake.
    ///
    /// The welcome line is surfaced as [`ClientEvent::System`]; a duplicate
    /// identity is an error and the connection is abandoned.
    pub async fn connect(
        url: &str,
        signer: SigningIdentity,
        encryption: EncryptionIdentity,
        name: &str,
        store: Arc<dyn ContactStore>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self, ClientError> {
        let (mut ws, _) = connect_async(url).await?;

        match ws.next().await {
            Some(Ok(msg)) if msg.is_text() => {
                if msg.to_text()? != GREETING {
                    return Err(ClientError::Protocol("expected greeting"));
                }
            }
            Some(Ok(_)) => return Err(ClientError::Protocol("expected greeting")),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ClientError::Protocol("closed before greeting")),
        }

        let id = signer.peer_id();
        let hello = HandshakeFrame {
            id,
            name: name.to_string(),
        };
        let json = serde_json::to_string(&hello)
            .map_err(|_| ClientError::Protocol("handshake frame did not encode"))?;
        ws.send(Message::text(json)).await?;

        match ws.next().await {
            Some(Ok(msg)) if msg.is_text() => {
                let line = msg.to_text()?;
                if line == ALREADY_CONNECTED {
                    return Err(ClientError::AlreadyConnected);
                }
                let _ = events.send(ClientEvent::System(line.to_string()));
            }
            Some(Ok(_)) => return Err(ClientError::Protocol("expected welcome line")),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ClientError::Protocol("closed before welcome")),
        }

        tracing::info!(peer = %id, name, "connected to relay");

        let (sink, stream) = ws.split();
        let signer = Arc::new(signer);
        let encryption = Arc::new(encryption);
        let pipeline = Inbound {
            my_id: id,
            encryption: encryption.clone(),
            store: store.clone(),
            events,
        };
        let listener = tokio::spawn(listen_loop(stream, pipeline));

        Ok(Self {
            id,
            name: name.to_string(),
            signer,
            encryption,
            store,
            sink: Arc::new(Mutex::new(sink)),
            listener,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Our shareable encryption key material, as carried by `/share key`.
    pub fn public_key_hex(&self) -> String {
        self.encryption.public_key_hex()
    }

    /// Send one message to a peer.
    ///
    /// Commands are expanded first and are never encrypted; ordinary text
    /// is encrypted when the recipient's key is on file. The outgoing nonce
    /// is persisted only after the frame has been written.
    ///
    /// Sends are serialized on the connection lock for the whole
    /// read-nonce, sign, transmit, persist sequence, so concurrent callers
    /// mint distinct consecutive nonces.
    pub async fn send(&self, to: PeerId, text: &str) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;

        let contact = match self.store.lookup(&to)? {
            Some(contact) => contact,
            None => {
                // First outbound message to this peer; the name fills in
                // once they answer.
                let contact = Contact::new(to, "");
                self.store.add(contact.clone())?;
                contact
            }
        };

        let (payload, encrypted) = match command::parse(text)? {
            Some(Command::ShareKey) => {
                let expanded = format!("/key {}", self.encryption.public_key_hex());
                (expanded.into_bytes(), false)
            }
            // Hand-written /key material travels as-is, still unencrypted.
            Some(Command::Key(_)) => (text.as_bytes().to_vec(), false),
            None => match contact.key {
                Some(key) => (seal(&key, text.as_bytes())?, true),
                None => (text.as_bytes().to_vec(), false),
            },
        };

        let nonce = contact.outgoing_nonce + 1;
        let signature = self.signer.sign(&to, &payload, nonce)?;
        let frame = ChatFrame {
            to_id: to,
            text: payload,
            from_nonce: nonce,
            encrypted,
            signature,
        };
        let json = serde_json::to_string(&frame)
            .map_err(|_| ClientError::Protocol("chat frame did not encode"))?;

        sink.send(Message::text(json)).await?;
        self.store.update_outgoing_nonce(&to, nonce)?;
        tracing::debug!(to = %to, nonce, encrypted, "sent frame");
        Ok(())
    }

    /// Close the connection. The listener ends when the close completes.
    pub async fn close(&self) {
        let _ = self.sink.lock().await.send(Message::Close(None)).await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

// ── Inbound pipeline ──────────────────────────────────────────────────────────

struct Inbound {
    my_id: PeerId,
    encryption: Arc<EncryptionIdentity>,
    store: Arc<dyn ContactStore>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Inbound {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Run one delivery through verification, ordering, decryption, and
    /// command interception. Rejections emit a system event and leave the
    /// contact record untouched.
    fn accept(&self, raw: &str) -> Result<(), ClientError> {
        let frame: DeliveryFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable delivery dropped");
                return Ok(());
            }
        };
        let from = frame.from.id;

        let contact = match self.store.lookup(&from)? {
            Some(contact) => contact,
            None => {
                let contact = Contact::new(from, &frame.from.name);
                self.store.add(contact.clone())?;
                self.emit(ClientEvent::ContactAdded {
                    id: from,
                    name: frame.from.name.clone(),
                });
                contact
            }
        };

        if let Err(e) = frame
            .signature
            .verify(&from, &self.my_id, &frame.text, frame.from.nonce)
        {
            tracing::warn!(from = %from, error = %e, "signature verification failed");
            self.emit(ClientEvent::System(format!(
                "dropped message from {from}: signature verification failed"
            )));
            return Ok(());
        }

        // Strict ordering: exactly last-accepted + 1, no window. A gap is
        // rejected until the missing message arrives.
        if frame.from.nonce != contact.incoming_nonce + 1 {
            tracing::warn!(
                from = %from,
                got = frame.from.nonce,
                want = contact.incoming_nonce + 1,
                "out-of-order message rejected"
            );
            self.emit(ClientEvent::System(format!(
                "dropped message from {from}: expected nonce {}, got {}",
                contact.incoming_nonce + 1,
                frame.from.nonce
            )));
            return Ok(());
        }
        self.store.update_incoming_nonce(&from, frame.from.nonce)?;

        let plaintext = if frame.encrypted {
            match self.encryption.open(&frame.text) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    tracing::warn!(from = %from, error = %e, "decryption failed");
                    self.emit(ClientEvent::System(format!(
                        "dropped message from {from}: decryption failed"
                    )));
                    return Ok(());
                }
            }
        } else {
            frame.text
        };
        let text = String::from_utf8_lossy(&plaintext).into_owned();

        // A /key line is protocol, not conversation.
        if let Ok(Some(Command::Key(material))) = command::parse(&text) {
            match parse_public_key(&material) {
                Ok(key) => {
                    self.store.update_key(&from, key)?;
                    self.emit(ClientEvent::KeyUpdated { id: from });
                }
                Err(_) => {
                    self.emit(ClientEvent::System(format!(
                        "dropped key material from {from}: not a valid key"
                    )));
                }
            }
            return Ok(());
        }

        self.emit(ClientEvent::Message {
            from,
            name: frame.from.name,
            text,
        });
        Ok(())
    }
}

async fn listen_loop(mut stream: WsStream, pipeline: Inbound) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) if msg.is_text() => {
                let raw = match msg.to_text() {
                    Ok(raw) => raw,
                    Err(_) => continue,
                };
                if let Err(e) = pipeline.accept(raw) {
                    tracing::error!(error = %e, "inbound pipeline failed");
                }
            }
            // Pings are answered by the transport; pongs are its replies.
            Some(Ok(msg)) if msg.is_ping() || msg.is_pong() => {}
            Some(Ok(msg)) if msg.is_close() => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "read failed, listener stopping");
                break;
            }
            None => break,
        }
    }
    pipeline.emit(ClientEvent::Disconnected);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
