use anyhow::Context;
use std::sync::Arc;
use thrustlink_core::bridge::event_channel;
use thrustlink_core::hub::Hub;
use thrustlink_core::storage::NullStore;
use thrustlink_core::transport::TransportDriver;
use thrustlink_server::{ServerConfig, WebSocketServer};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!(
        version = thrustlink_core::VERSION,
        serial_port = %config.serial_port,
        baud = config.serial_baud,
        listen = %config.listen_addr(),
        "starting thrustlink"
    );

    let (events, receiver) = event_channel();
    let driver = TransportDriver::spawn(config.driver_config(), events)
        .context("failed to start serial driver")?;

    let hub = Arc::new(Hub::new(
        Arc::new(driver.writer()),
        driver.status(),
        Arc::new(NullStore),
    ));
    let hub_task = tokio::spawn(Arc::clone(&hub).run(receiver));

    let server = WebSocketServer::bind(config.listen_addr(), hub)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let serving = tokio::spawn(server.serve(stop_rx));

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = stop_tx.send(true);
    if let Err(e) = serving.await {
        warn!(error = %e, "websocket server task failed");
    }

    // Joining the reader thread blocks for up to one read timeout
    tokio::task::spawn_blocking(move || driver.shutdown())
        .await
        .context("serial driver shutdown failed")?;
    hub_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}
