//! Hopwire Logging
//!
//! Logging setup shared by the daemon and tools.
//!
//! ## Usage
//!
//! ```no_run
//! use hopwire_logging::{init, LogLevel};
//!
//! init(LogLevel::from_verbose(false));
//! ```
//!
//! `RUST_LOG` always wins over the level passed in.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    /// Info for everything, debug for hopwire crates (default)
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `false` → `Info`, `true` → `Debug`
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Self::Debug
        } else {
            Self::Info
        }
    }

    /// Default filter directive for this level
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info,hopwire=debug",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Initialize logging with the specified level.
///
/// # Panics
///
/// Panics if a global subscriber is already installed; use [`try_init`]
/// where that can happen.
pub fn init(level: LogLevel) {
    if let Err(e) = try_init(level) {
        panic!("Failed to initialize logging: {}", e);
    }
}

/// Try to initialize logging, returning an error if already initialized
pub fn try_init(level: LogLevel) -> Result<(), String> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter_for(level))
        .try_init()
        .map_err(|e| e.to_string())
}

/// Initialize logging for tests (output captured by the test harness)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
