//! Hopwire Settings
//!
//! The client configuration record.
//!
//! ## Usage
//!
//! ```no_run
//! use hopwire_settings::Config;
//! use hopwire_store::FsStore;
//!
//! let store = FsStore::open("~/.hopwire")?;
//!
//! // Defaults when config.json does not exist yet
//! let mut config = Config::load(&store)?;
//! config.circuit.hops = 3;
//! config.save(&store)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The record is loaded once at startup and handed down by reference; a
//! reload replaces it wholesale.

mod config;

pub use config::{
    AccesskeySettings, AddressSettings, CircuitSettings, Config, OptionKind, OptionMeta,
    TunSettings, TARGET_PROTOCOL_ENV,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Store(#[from] hopwire_store::StoreError),

    #[error("Invalid settings: {0}")]
    Invalid(#[from] hopwire_core::ConfigError),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
