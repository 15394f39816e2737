//! Auxiliary tunneling helper process
//!
//! The helper routes a TUN device into the SOCKS5 listener. It reads the
//! bypass set from the data directory to keep contract, directory and entry
//! relay traffic out of the tunnel.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use hopwire_store::{names, HOME_ENV};

use crate::{DaemonError, Result};

pub struct TunProcess {
    child: Child,
}

impl TunProcess {
    /// Spawn `binary` for device address `tun` forwarding into `socks`
    pub fn start(binary: &str, tun: &str, socks: &str, data_dir: Option<&Path>) -> Result<Self> {
        let mut command = Command::new(binary);
        command
            .arg("--tun")
            .arg(tun)
            .arg("--socks")
            .arg(socks)
            .arg("--bypass")
            .arg(names::BYPASS)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = data_dir {
            command.current_dir(dir).env(HOME_ENV, dir);
        }

        let child = command
            .spawn()
            .map_err(|e| DaemonError::Tun(format!("could not start {}: {}", binary, e)))?;
        info!(
            "Started tun helper {} (pid {}) on {}",
            binary,
            child.id().unwrap_or_default(),
            tun
        );
        Ok(Self { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the helper and reap it
    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Could not stop tun helper: {}", e);
            return;
        }
        info!("Tun helper stopped");
    }
}
