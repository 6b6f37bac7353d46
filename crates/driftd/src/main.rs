//! driftd — websocket chat relay node.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use drift_core::config::RelayConfig;
use driftd::MemoryBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::load()?;
    tracing::info!(
        listen = config.node.listen_addr,
        topic = config.bus.topic,
        "starting driftd"
    );

    let bus = MemoryBus::new(
        &config.bus.topic,
        Duration::from_secs(config.bus.max_age_hours * 3600),
    );
    let node = driftd::node::start(config, bus).await?;

    tokio::signal::ctrl_c().await?;
    node.shutdown();
    // Give sessions a moment to flush close frames.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
