// EstateGuard node binary.
//
// Boots the plugin-based listing-processing runtime: loads configuration,
// initializes structured logging, wires every subsystem through the core
// crate, then runs until a shutdown signal arrives and unwinds gracefully.

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};

use estateguard_core::{init_logging, EstateGuard, GuardConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first so the log level and format come from the same
    // place as everything else; RUST_LOG still wins when set.
    let config = GuardConfig::load()?;
    init_logging(&config.log);

    info!("starting estateguard");

    let node = match EstateGuard::new(config) {
        Ok(node) => node,
        Err(err) => {
            error!(error = %err, "failed to construct the node");
            return Err(err);
        }
    };

    if let Err(err) = node.start().await {
        error!(error = %err, "failed to start the node");
        return Err(err);
    }

    // Run until Ctrl+C / SIGTERM from the orchestrator environment.
    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => error!(error = %err, "unable to listen for shutdown signal"),
    }

    if let Err(err) = node.stop().await {
        error!(error = %err, "error during shutdown");
        return Err(err);
    }

    info!("estateguard stopped");
    Ok(())
}
