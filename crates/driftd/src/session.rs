//! Session lifecycle — one task per websocket connection.
//!
//! Lifecycle: greet, collect the identity declaration within the handshake
//! window, register, then loop reading frames until the peer leaves or the
//! heartbeat supervisor evicts the entry. All outbound traffic for the
//! connection funnels through a dedicated writer task, so the read loop,
//! the router, the bus consumer, and the supervisor never contend for the
//! sink.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitStream, StreamExt};
use futures_util::SinkExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use drift_core::frame::{
    welcome, BusEnvelope, ChatFrame, DeliveryFrame, HandshakeFrame, Sender, ALREADY_CONNECTED,
    GREETING,
};
use drift_core::NodeId;
use drift_core::PeerId;

use crate::bus::{publish_envelope, Bus};
use crate::registry::{ConnectionHandle, Registry, RegistryError};

/// Why a session ended before or during its active phase. Handshake
/// failures terminate the session; active-phase decode errors do not.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no identity declared within the handshake window")]
    Handshake,

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("identity {0} is already connected")]
    DuplicateIdentity(PeerId),

    #[error("transport error: {0}")]
    Transport(#[from] WsError),

    #[error("cancelled by shutdown")]
    Cancelled,
}

/// Drive one connection from accept to teardown.
pub async fn run<B: Bus>(
    stream: WebSocketStream<TcpStream>,
    peer_addr: SocketAddr,
    node_id: NodeId,
    registry: Arc<Registry>,
    bus: B,
    handshake_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (sink, mut stream) = stream.split();
    let (handle, rx) = ConnectionHandle::new();
    let writer = tokio::spawn(write_loop(sink, rx));

    // ── Handshake ─────────────────────────────────────────────────────────

    let hello = match establish(&mut stream, &handle, &registry, handshake_timeout).await {
        Ok(hello) => hello,
        Err(e) => {
            tracing::warn!(%peer_addr, error = %e, "handshake failed");
            handle.close();
            let _ = writer.await;
            return;
        }
    };

    let id = hello.id;
    let name = hello.name;
    tracing::info!(%peer_addr, peer = %id, name, "session established");

    if handle.send_text(welcome(&name)).is_err() {
        registry.remove(&id);
        let _ = writer.await;
        return;
    }

    // ── Active ────────────────────────────────────────────────────────────

    let outcome = active(
        &mut stream,
        &handle,
        id,
        &name,
        node_id,
        &registry,
        &bus,
        &mut shutdown,
    )
    .await;

    // Teardown is idempotent with supervisor eviction: whichever side
    // removes first wins, the other finds nothing.
    registry.remove(&id);
    drop(handle);
    let _ = writer.await;
    match outcome {
        Ok(()) => tracing::info!(peer = %id, "session closed"),
        Err(e) => tracing::warn!(peer = %id, error = %e, "session closed"),
    }
}

/// Active-phase read loop. Returns Ok when the peer leaves cleanly or its
/// registry entry disappears, Err for shutdown or a fatal transport error.
#[allow(clippy::too_many_arguments)]
async fn active<B: Bus>(
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    handle: &ConnectionHandle,
    id: PeerId,
    name: &str,
    node_id: NodeId,
    registry: &Registry,
    bus: &B,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), SessionError> {
    loop {
        let incoming = tokio::select! {
            _ = shutdown.recv() => {
                handle.close();
                return Err(SessionError::Cancelled);
            }
            incoming = stream.next() => incoming,
        };

        match incoming {
            Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                let raw = match msg.into_text() {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(peer = %id, error = %e, "non-utf8 frame ignored");
                        continue;
                    }
                };
                route(&raw, id, name, node_id, registry, bus);
            }
            Some(Ok(msg)) if msg.is_pong() => {
                if registry.touch_pong(&id).is_err() {
                    // Evicted mid-flight; the entry is gone, so is the session.
                    tracing::debug!(peer = %id, "pong from evicted peer");
                    return Ok(());
                }
            }
            // Transport answers pings on its own.
            Some(Ok(msg)) if msg.is_ping() => {}
            Some(Ok(msg)) if msg.is_close() => {
                tracing::info!(peer = %id, "peer closed the connection");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if is_transient(&e) {
                    continue;
                }
                return Err(SessionError::Transport(e));
            }
            None => return Ok(()),
        }
    }
}

/// Router: local recipient gets the frame directly, everyone else goes
/// over the bus. A frame that cannot be decoded is dropped, not fatal.
fn route<B: Bus>(
    raw: &str,
    from_id: PeerId,
    from_name: &str,
    node_id: NodeId,
    registry: &Registry,
    bus: &B,
) {
    let chat: ChatFrame = match serde_json::from_str(raw) {
        Ok(chat) => chat,
        Err(e) => {
            tracing::warn!(peer = %from_id, error = %e, "undecodable chat frame dropped");
            return;
        }
    };

    match registry.get(&chat.to_id) {
        Ok(entry) => {
            tracing::info!(from = %from_id, to = %chat.to_id, "delivering locally");
            let delivery = DeliveryFrame {
                from: Sender {
                    id: from_id,
                    name: from_name.to_string(),
                    nonce: chat.from_nonce,
                },
                text: chat.text,
                encrypted: chat.encrypted,
                signature: chat.signature,
            };
            if let Err(e) = entry.handle.send_json(&delivery) {
                tracing::error!(to = %entry.id, error = %e, "local delivery failed");
            }
        }
        Err(_) => {
            tracing::info!(from = %from_id, to = %chat.to_id, "recipient not local, publishing to bus");
            let envelope = BusEnvelope::from_chat(node_id, from_id, from_name, chat);
            if let Err(e) = publish_envelope(bus, &envelope) {
                tracing::error!(from = %from_id, error = %e, "bus publish failed");
            }
        }
    }
}

/// Handshake: greet, read the identity declaration within the window,
/// register. The rejection line for a duplicate identity is queued before
/// the caller closes the connection.
async fn establish(
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    handle: &ConnectionHandle,
    registry: &Registry,
    handshake_timeout: Duration,
) -> Result<HandshakeFrame, SessionError> {
    handle
        .send_text(GREETING)
        .map_err(|_| SessionError::Protocol("connection gone before greeting"))?;

    let first = tokio::time::timeout(handshake_timeout, stream.next())
        .await
        .map_err(|_| SessionError::Handshake)?;

    let msg = match first {
        Some(Ok(msg)) if msg.is_text() || msg.is_binary() => msg,
        Some(Ok(_)) => return Err(SessionError::Protocol("expected an identity frame")),
        Some(Err(e)) => return Err(SessionError::Transport(e)),
        None => return Err(SessionError::Protocol("closed during handshake")),
    };
    let raw = msg
        .into_text()
        .map_err(|_| SessionError::Protocol("identity frame is not utf-8"))?;
    let hello: HandshakeFrame = serde_json::from_str(&raw)
        .map_err(|_| SessionError::Protocol("identity frame did not decode"))?;

    if let Err(RegistryError::AlreadyConnected(id)) =
        registry.add(hello.id, &hello.name, handle.clone())
    {
        // The first connection keeps its registration; this one is told
        // why and turned away.
        let _ = handle.send_text(ALREADY_CONNECTED);
        return Err(SessionError::DuplicateIdentity(id));
    }
    Ok(hello)
}

fn is_transient(e: &WsError) -> bool {
    matches!(
        e,
        WsError::Io(io)
            if matches!(io.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted)
    )
}

/// Writer task: sole owner of the sink. Ends when every handle clone has
/// dropped or a close frame goes through, then closes the transport.
async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = msg.is_close();
        if sink.send(msg).await.is_err() {
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
