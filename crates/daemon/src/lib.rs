//! Hopwire Daemon
//!
//! Long-running connection broker: keeps a credential and a circuit ready
//! and serves local applications through a SOCKS5 listener.
//!
//! ## Components
//!
//! - **Daemon**: startup checks, reload and one-shot shutdown
//! - **Socks5Server**: SOCKS5 CONNECT listener dialing through the circuit
//! - **TunProcess**: optional auxiliary tunneling helper
//!
//! ## Signals
//!
//! - `SIGUSR1`: reload configuration, contract information and circuit
//! - `SIGINT`, `SIGTERM`, `SIGQUIT`: graceful shutdown
//!
//! ## Environment
//!
//! - `HOPWIRE_HOME`: data directory (default `~/.hopwire`)
//! - `HOPWIRE_TARGET_PROTOCOL`: protocol used to reach destinations

mod service;
pub mod signals;
mod socks5;
mod tun;

pub use service::Daemon;
pub use signals::Signal;
pub use socks5::Socks5Server;
pub use tun::TunProcess;

use thiserror::Error;

use hopwire_core::{CircuitBuildError, ConfigError, CredentialError};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Settings error: {0}")]
    Settings(#[from] hopwire_settings::SettingsError),

    #[error("Could not get contract info: {0}")]
    Contract(#[from] CircuitBuildError),

    #[error("Could not validate proof tokens: {0}")]
    Credential(#[from] CredentialError),

    #[error("Contract API error: {0}")]
    Api(#[from] hopwire_client::ApiError),

    #[error("Store error: {0}")]
    Store(#[from] hopwire_store::StoreError),

    #[error("Already running")]
    AlreadyRunning,

    #[error("Tun helper error: {0}")]
    Tun(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
