//! drift integration test harness.
//!
//! Every test runs against real websocket connections to in-process relay
//! nodes bound on 127.0.0.1:0. Multi-node scenarios share one `MemoryBus`,
//! which is exactly how two nodes of a deployment share a broker topic.
//!
//! The harness below is the raw-protocol client: it speaks the handshake
//! and frame protocol directly so server behavior can be asserted without
//! the client-side pipelines in the way. `messaging.rs` uses the real
//! `drift_client::Client` on top of the same nodes.

mod bridge;
mod messaging;
mod relay;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use drift_core::config::RelayConfig;
use drift_core::crypto::SigningIdentity;
use drift_core::frame::{welcome, ChatFrame, HandshakeFrame, GREETING};
use drift_core::PeerId;
use driftd::{MemoryBus, NodeHandle};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Config for a test node: ephemeral port, generous handshake window,
/// heartbeat slow enough to stay out of the way.
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.node.listen_addr = "127.0.0.1:0".to_string();
    config.node.handshake_timeout_ms = 1_000;
    config.heartbeat.interval_secs = 60;
    config
}

pub async fn start_node(bus: MemoryBus) -> NodeHandle {
    driftd::node::start(test_config(), bus)
        .await
        .expect("node failed to start")
}

pub fn test_bus() -> MemoryBus {
    MemoryBus::new("drift.test", Duration::from_secs(3600))
}

/// Read the next text frame, skipping transport-level ping/pong.
pub async fn recv_text(ws: &mut WsClient) -> String {
    let deadline = Duration::from_secs(2);
    loop {
        let msg = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended unexpectedly")
            .expect("websocket error");
        if msg.is_text() {
            return msg.to_text().unwrap().to_string();
        }
        assert!(
            msg.is_ping() || msg.is_pong(),
            "unexpected frame: {msg:?}"
        );
    }
}

pub async fn send_json<T: serde::Serialize>(ws: &mut WsClient, frame: &T) {
    let json = serde_json::to_string(frame).unwrap();
    ws.send(Message::text(json)).await.unwrap();
}

/// Dial a node and complete the handshake as `signer`.
pub async fn join(addr: SocketAddr, signer: &SigningIdentity, name: &str) -> WsClient {
    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    assert_eq!(recv_text(&mut ws).await, GREETING);
    send_json(
        &mut ws,
        &HandshakeFrame {
            id: signer.peer_id(),
            name: name.to_string(),
        },
    )
    .await;
    assert_eq!(recv_text(&mut ws).await, welcome(name));
    ws
}

/// Build a signed plaintext chat frame.
pub fn signed_chat(signer: &SigningIdentity, to: PeerId, text: &[u8], nonce: u64) -> ChatFrame {
    let signature = signer.sign(&to, text, nonce).unwrap();
    ChatFrame {
        to_id: to,
        text: text.to_vec(),
        from_nonce: nonce,
        encrypted: false,
        signature,
    }
}
