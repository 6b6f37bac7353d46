//! Heartbeat supervisor — periodic liveness sweep over the registry.
//!
//! Every tick: evict any connection whose last ping has gone unanswered
//! for longer than `max_wait` (eviction is immediate and terminal), and
//! probe the entries with no ping in flight. A peer that has not answered
//! yet is left alone so `last_ping` stays anchored at the unanswered
//! probe; re-probing it would reset the staleness clock every tick.
//! Probes are fire-and-forget; the matching pong arrives through the
//! session read loop, which calls [`Registry::touch_pong`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::registry::Registry;

/// Run the supervisor until shutdown. One per node.
pub async fn run(
    registry: Arc<Registry>,
    interval: Duration,
    max_wait: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so fresh nodes do not
    // probe before anyone has connected.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("heartbeat supervisor shutting down");
                return;
            }
            _ = ticker.tick() => sweep(&registry, max_wait),
        }
    }
}

/// One pass over a snapshot of the registry.
fn sweep(registry: &Registry, max_wait: Duration) {
    let now = Instant::now();

    for (id, entry) in registry.snapshot() {
        // A ping newer than the last pong is outstanding. Outstanding
        // past max_wait means the peer is presumed dead; outstanding
        // within max_wait means keep waiting, without touching the
        // anchor timestamp.
        if entry.last_pong < entry.last_ping {
            if now.duration_since(entry.last_ping) > max_wait {
                tracing::warn!(
                    peer = %id,
                    name = entry.name,
                    outstanding_ms = now.duration_since(entry.last_ping).as_millis() as u64,
                    max_wait_ms = max_wait.as_millis() as u64,
                    "no pong within max wait, evicting"
                );
                if let Some(evicted) = registry.remove(&id) {
                    evicted.handle.close();
                }
            }
            continue;
        }

        if let Err(e) = entry.handle.send_ping() {
            // Not fatal: the next sweep's staleness check catches a dead
            // connection once its ping goes unanswered.
            tracing::error!(peer = %id, error = %e, "sending ping failed");
        }
        if let Err(e) = registry.touch_ping(&id) {
            tracing::debug!(peer = %id, error = %e, "peer vanished between snapshot and touch");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
