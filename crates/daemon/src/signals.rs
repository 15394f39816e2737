//! Process signal handling
//!
//! `SIGUSR1` asks for a reload; `SIGINT`, `SIGTERM` and `SIGQUIT` ask for
//! shutdown. Signals are turned into [`Signal`] values on a channel so the
//! daemon loop can be driven without a real process in tests.

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::Daemon;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Reload,
    Shutdown,
}

/// Install handlers and forward every received signal to the returned channel
#[cfg(unix)]
pub fn listen() -> std::io::Result<mpsc::Receiver<Signal>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut reload = signal(SignalKind::user_defined1())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            let (received, name) = tokio::select! {
                Some(()) = reload.recv() => (Signal::Reload, "SIGUSR1"),
                Some(()) = interrupt.recv() => (Signal::Shutdown, "SIGINT"),
                Some(()) = terminate.recv() => (Signal::Shutdown, "SIGTERM"),
                Some(()) = quit.recv() => (Signal::Shutdown, "SIGQUIT"),
                else => break,
            };
            info!("Received {}", name);
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

#[cfg(not(unix))]
pub fn listen() -> std::io::Result<mpsc::Receiver<Signal>> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            if tx.send(Signal::Shutdown).await.is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

/// Handle signals until shutdown. A closed channel also shuts down.
pub async fn drive(daemon: &Daemon, mut signals: mpsc::Receiver<Signal>) {
    while let Some(signal) = signals.recv().await {
        match signal {
            Signal::Reload => {
                if let Err(e) = daemon.reload().await {
                    error!("Reload aborted: {}", e);
                }
            }
            Signal::Shutdown => break,
        }
    }
    daemon.shutdown().await;
}
