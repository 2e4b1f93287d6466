//! Fabric Node - Main Entry Point
//!
//! Runs one fabric node: registers itself, loads static credentials and
//! serves the admin API until a shutdown signal arrives.

mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use platform_common::init_tracing;
use service_fabric::{Fabric, FabricConfig, admin_router};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = FabricConfig::from_env().context("invalid fabric configuration")?;
    init_tracing(&config.tracing_config());

    info!(service = %config.service_name, "Starting fabric node");

    let addr = SocketAddr::from(([0, 0, 0, 0], config.admin_port));
    let fabric = Arc::new(Fabric::init(config)?);
    fabric.register_self()?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin port {addr}"))?;
    info!(%addr, "Admin API listening");

    axum::serve(listener, admin_router(Arc::clone(&fabric)))
        .with_graceful_shutdown(shutdown::wait_for_signal())
        .await
        .context("admin server failed")?;

    fabric.shutdown();
    info!("Fabric node stopped");
    Ok(())
}
