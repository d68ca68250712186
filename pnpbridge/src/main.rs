//! PnP device bridge.
//!
//! Discovers local devices, binds them to protocol adapters and publishes
//! them as components of the gateway's cloud twin over Zenoh.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pnpbridge::args::PnpBridgeArgs;
use pnpbridge::config::PnpBridgeConfig;
use pnpbridge::default_manifest;
use pnpbridge::twin::ZenohConnector;
use pnpbridge_core::Bridge;

#[tokio::main]
async fn main() -> Result<()> {
    let args = PnpBridgeArgs::parse();

    let config = PnpBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = config.logging.with_level_override(args.log_level.as_deref());
    pnpbridge_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pnpbridge");
    info!("Loaded configuration from {:?}", args.config);

    let connection = config
        .connection
        .resolve(|name| std::env::var(name).ok())
        .context("Failed to resolve cloud connection")?;
    info!(
        device_id = %connection.device_id,
        endpoints = ?connection.endpoints,
        "Cloud connection resolved"
    );

    let connector = ZenohConnector::new(&config, &connection)
        .context("Failed to build twin connector")?;
    let bridge = Arc::new(
        Bridge::new(config.bridge, default_manifest(), connector)
            .context("Failed to initialize bridge")?,
    );

    let signal_bridge = bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received shutdown signal");
        signal_bridge.stop();
    });

    bridge.run().await.context("Bridge failed")?;
    info!("pnpbridge stopped");

    Ok(())
}
