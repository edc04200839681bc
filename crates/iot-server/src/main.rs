//! IoT Platform Server
//!
//! Main entry point: loads configuration, wires storage, simulated devices and
//! the flow router, then feeds device topics from stdin until interrupted.
//!
//! ```text
//! iot-platform [config.yaml]
//! ```

mod feed;
mod platform;

use anyhow::Result;
use iot_config::PlatformConfig;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::platform::Platform;

fn init_tracing(default_level: &str) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => PlatformConfig::load(&path)?,
        None => PlatformConfig::default(),
    };
    init_tracing(&config.log_level)?;

    info!("Starting IoT platform (Rust)");

    let platform = Platform::new(config).await?;
    let enabled = platform.seed_flows().await?;
    info!(
        enabled_flows = enabled,
        devices = platform.commands.devices().len(),
        "IoT platform initialized"
    );

    platform.log_runs();
    platform.start();

    let bus = platform.bus.clone();
    let commands = platform.commands.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = feed::run(stdin, bus, commands).await {
            error!("Topic feed stopped: {}", e);
        }
    });

    info!("IoT platform is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    platform.stop();

    Ok(())
}
