//! Node assembly — wires listener, registry, heartbeat supervisor, and bus
//! consumer together and owns the shutdown channel.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use drift_core::config::RelayConfig;
use drift_core::NodeId;

use crate::bus::Bus;
use crate::registry::Registry;
use crate::{bus, heartbeat, session};

/// A running relay node.
///
/// Dropping the handle does not stop the node; call [`NodeHandle::shutdown`].
pub struct NodeHandle {
    pub node_id: NodeId,
    pub local_addr: SocketAddr,
    pub registry: Arc<Registry>,
    shutdown: broadcast::Sender<()>,
}

impl NodeHandle {
    /// Signal every task of the node to stop.
    pub fn shutdown(&self) {
        tracing::info!(node = %self.node_id, "shutting down");
        let _ = self.shutdown.send(());
    }
}

/// Bind the listener and spawn the node's tasks.
pub async fn start<B: Bus>(config: RelayConfig, bus: B) -> anyhow::Result<NodeHandle> {
    let node_id = if config.node.id.is_empty() {
        NodeId::generate()
    } else {
        NodeId::from_str(&config.node.id).context("configured node id is invalid")?
    };

    let listener = TcpListener::bind(&config.node.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.node.listen_addr))?;
    let local_addr = listener.local_addr().context("listener has no address")?;

    let registry = Arc::new(Registry::new());
    let (shutdown, _) = broadcast::channel(1);

    tracing::info!(node = %node_id, %local_addr, "relay node listening");

    tokio::spawn(heartbeat::run(
        registry.clone(),
        config.heartbeat.interval(),
        config.heartbeat.max_wait(),
        shutdown.subscribe(),
    ));

    tokio::spawn(bus::consume_loop(
        bus.subscribe(),
        node_id,
        registry.clone(),
        shutdown.subscribe(),
    ));

    tokio::spawn(accept_loop(
        listener,
        node_id,
        registry.clone(),
        bus,
        config,
        shutdown.clone(),
    ));

    Ok(NodeHandle {
        node_id,
        local_addr,
        registry,
        shutdown,
    })
}

async fn accept_loop<B: Bus>(
    listener: TcpListener,
    node_id: NodeId,
    registry: Arc<Registry>,
    bus: B,
    config: RelayConfig,
    shutdown: broadcast::Sender<()>,
) {
    let mut stop = shutdown.subscribe();
    loop {
        let accepted = tokio::select! {
            _ = stop.recv() => {
                tracing::info!(node = %node_id, "listener shutting down");
                return;
            }
            accepted = listener.accept() => accepted,
        };

        let (tcp, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                continue;
            }
        };

        let registry = registry.clone();
        let bus = bus.clone();
        let handshake_timeout = config.node.handshake_timeout();
        let session_shutdown = shutdown.subscribe();

        tokio::spawn(async move {
            let ws = match tokio_tungstenite::accept_async(tcp).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!(%peer_addr, error = %e, "websocket upgrade failed");
                    return;
                }
            };
            session::run(
                ws,
                peer_addr,
                node_id,
                registry,
                bus,
                handshake_timeout,
                session_shutdown,
            )
            .await;
        });
    }
}
