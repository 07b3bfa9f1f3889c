//! Hub daemon
//!
//! Loads `hub.yaml` from the config directory given as the first argument
//! (default: the current directory), brings up the hardware managers and the
//! device runtime, and logs every runtime event until Ctrl-C.

mod hub;

use std::path::PathBuf;

use anyhow::{Context, Result};
use hub_config::HubConfig;
use hub_devices::{DevicePlugin, DeviceRuntime};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Plugins compiled into this binary
fn builtin_plugins() -> Vec<Box<dyn DevicePlugin>> {
    Vec::new()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = HubConfig::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(name = %config.name, config_dir = %config_dir.display(), "Starting hub");

    let (bus, manager) = hub::build_manager(&config, builtin_plugins())?;
    info!(
        plugins = manager.plugins().len(),
        device_classes = manager.supported_devices(None).len(),
        "Plugins loaded"
    );

    let mut events = bus.subscribe_all();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(event_type = %event.event_type, data = %event.data, "Runtime event")
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let runtime = DeviceRuntime::spawn(manager);
    info!("Hub is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let manager = runtime.shutdown().await?;
    info!(
        devices = manager.configured_devices().count(),
        "Device runtime stopped"
    );
    logger.abort();

    Ok(())
}
