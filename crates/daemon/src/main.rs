//! Hopwire Daemon Binary
//!
//! Starts the broker in the data directory and runs until a shutdown signal.

use anyhow::Context;
use hopwire_daemon::{signals, Daemon};
use hopwire_logging::LogLevel;
use hopwire_store::default_data_dir;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hopwire_logging::init(LogLevel::default());

    tracing::info!("Starting Hopwire daemon...");

    let data_dir = default_data_dir();
    let daemon = Daemon::open(data_dir.clone())
        .with_context(|| format!("could not open data directory {}", data_dir.display()))?;

    let rx = signals::listen().context("could not install signal handlers")?;

    if let Err(e) = daemon.start().await {
        daemon.shutdown().await;
        return Err(e).context("daemon failed to start");
    }

    signals::drive(&daemon, rx).await;
    Ok(())
}
