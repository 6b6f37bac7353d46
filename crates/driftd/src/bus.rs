//! Cross-node bus bridge.
//!
//! Messages addressed to a peer that is not connected locally are
//! republished onto a shared topic; every node of the deployment consumes
//! that topic, discards its own envelopes by origin tag, and delivers to
//! locally-registered recipients. Bus semantics are at-least-once with
//! explicit per-message acknowledgment and new-messages-only delivery for
//! fresh subscribers.
//!
//! The broker itself sits behind the [`Bus`] / [`BusSubscription`] seam.
//! [`MemoryBus`] is the in-process implementation used by single-host
//! deployments and by the test suite; a durable external broker is a
//! drop-in behind the same traits.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use drift_core::frame::BusEnvelope;
use drift_core::NodeId;

use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("acknowledgment failed: {0}")]
    Ack(String),

    #[error("bus is closed")]
    Closed,
}

// ── Seam ──────────────────────────────────────────────────────────────────────

/// Handle for publishing onto and subscribing to the shared topic.
pub trait Bus: Clone + Send + Sync + 'static {
    type Subscription: BusSubscription;

    /// Publish one serialized envelope. Synchronous from the router's
    /// perspective; failure means the message is dropped, retry is the
    /// caller's concern.
    fn publish(&self, payload: Bytes) -> Result<(), BusError>;

    /// Open a subscription positioned at "new messages only".
    fn subscribe(&self) -> Self::Subscription;
}

/// One node's reading position on the topic.
pub trait BusSubscription: Send + 'static {
    /// Wait for the next delivery. `None` means the topic is gone.
    fn next(&mut self) -> impl Future<Output = Option<BusDelivery>> + Send;
}

/// One message offered to a consumer, carrying its acknowledgment.
pub struct BusDelivery {
    pub payload: Bytes,
    ack: Option<Box<dyn FnOnce() -> Result<(), BusError> + Send>>,
}

impl BusDelivery {
    pub fn new(
        payload: Bytes,
        ack: impl FnOnce() -> Result<(), BusError> + Send + 'static,
    ) -> Self {
        Self {
            payload,
            ack: Some(Box::new(ack)),
        }
    }

    /// Acknowledge the delivery. Safe to call once; later calls are no-ops.
    pub fn ack(&mut self) -> Result<(), BusError> {
        match self.ack.take() {
            Some(ack) => ack(),
            None => Ok(()),
        }
    }
}

// ── In-process bus ────────────────────────────────────────────────────────────

struct AckRecord {
    published_at: Instant,
    acks: usize,
}

/// Shared-topic bus backed by a broadcast channel.
///
/// Every subscriber — the publisher included — sees every message
/// published after it subscribed. Acknowledgments land in a ledger the
/// tests inspect; records older than `max_age` are pruned on publish.
#[derive(Clone)]
pub struct MemoryBus {
    topic: String,
    tx: broadcast::Sender<(u64, Bytes)>,
    seq: Arc<AtomicU64>,
    ledger: Arc<DashMap<u64, AckRecord>>,
    max_age: Duration,
}

impl MemoryBus {
    pub fn new(topic: &str, max_age: Duration) -> Self {
        let (tx, _) = broadcast::channel(1024);
        tracing::info!(topic, "memory bus created");
        Self {
            topic: topic.to_string(),
            tx,
            seq: Arc::new(AtomicU64::new(0)),
            ledger: Arc::new(DashMap::new()),
            max_age,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// How many consumers acknowledged message `seq`. Test hook.
    pub fn ack_count(&self, seq: u64) -> usize {
        self.ledger.get(&seq).map(|r| r.acks).unwrap_or(0)
    }

    /// Highest sequence number published so far. Test hook.
    pub fn published(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn prune(&self) {
        let max_age = self.max_age;
        self.ledger
            .retain(|_, record| record.published_at.elapsed() <= max_age);
    }
}

impl Bus for MemoryBus {
    type Subscription = MemorySubscription;

    fn publish(&self, payload: Bytes) -> Result<(), BusError> {
        self.prune();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.insert(
            seq,
            AckRecord {
                published_at: Instant::now(),
                acks: 0,
            },
        );
        // No subscribers is not a publish failure: the topic accepted the
        // message even if nobody is positioned to read it.
        let _ = self.tx.send((seq, payload));
        tracing::debug!(topic = %self.topic, seq, "published to bus");
        Ok(())
    }

    fn subscribe(&self) -> MemorySubscription {
        MemorySubscription {
            rx: self.tx.subscribe(),
            ledger: self.ledger.clone(),
        }
    }
}

pub struct MemorySubscription {
    rx: broadcast::Receiver<(u64, Bytes)>,
    ledger: Arc<DashMap<u64, AckRecord>>,
}

impl BusSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<BusDelivery> {
        loop {
            match self.rx.recv().await {
                Ok((seq, payload)) => {
                    let ledger = self.ledger.clone();
                    return Some(BusDelivery::new(payload, move || {
                        match ledger.get_mut(&seq) {
                            Some(mut record) => {
                                record.acks += 1;
                                Ok(())
                            }
                            None => Err(BusError::Ack(format!("message {seq} expired"))),
                        }
                    }));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // At-least-once does not survive an unbounded backlog
                    // in-process; skipped messages surface in the log.
                    tracing::warn!(skipped, "bus consumer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// Publish path: serialize an envelope onto the topic.
pub fn publish_envelope<B: Bus>(bus: &B, envelope: &BusEnvelope) -> Result<(), BusError> {
    let bytes = serde_json::to_vec(envelope).map_err(|e| BusError::Publish(e.to_string()))?;
    bus.publish(Bytes::from(bytes))
}

/// Consume path: runs for the node's lifetime, independent of any session.
///
/// Per envelope: self-originated traffic is discarded without an ack
/// (loop prevention by origin tag); everything else is acknowledged once
/// offered to this node, whether or not the recipient is registered here.
pub async fn consume_loop<S: BusSubscription>(
    mut sub: S,
    node_id: NodeId,
    registry: Arc<Registry>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let mut delivery = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("bus consumer shutting down");
                return;
            }
            next = sub.next() => match next {
                Some(delivery) => delivery,
                None => {
                    tracing::warn!("bus subscription closed");
                    return;
                }
            },
        };

        let envelope: BusEnvelope = match serde_json::from_slice(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "unmarshaling bus message failed");
                continue;
            }
        };

        if envelope.origin == node_id {
            continue;
        }

        tracing::info!(
            from = %envelope.from_id,
            to = %envelope.to_id,
            origin = %envelope.origin,
            "received message from bus"
        );

        match registry.get(&envelope.to_id) {
            Ok(entry) => {
                let to = envelope.to_id;
                if let Err(e) = entry.handle.send_json(&envelope.into_delivery()) {
                    tracing::error!(to = %to, error = %e, "bus delivery write failed");
                }
            }
            Err(_) => {
                tracing::debug!(to = %envelope.to_id, "bus recipient not on this node");
            }
        }

        if let Err(e) = delivery.ack() {
            tracing::error!(error = %e, "failed to ack bus message");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
