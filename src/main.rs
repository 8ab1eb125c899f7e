//! ferrokv server binary.
//!
//! Parses flags, sets up logging, binds the listener and serves until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use ferrokv::{Server, ServerConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ferrokv=info")),
        )
        .with_target(false)
        .init();

    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    info!(
        version = ferrokv::VERSION,
        addr = %server.local_addr()?,
        "ferrokv ready to accept connections"
    );

    server
        .run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Server shutdown complete");
    Ok(())
}
