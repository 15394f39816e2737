//! Hopwire Client
//!
//! The client core: turns proof tokens into a signing credential, keeps a
//! circuit of relays cached, and dials destinations by extending a tunnel
//! through that circuit one hop at a time.
//!
//! ## Overview
//!
//! - [`CredentialManager`]: credential cache and refresh state machine
//! - [`import_accesskey`]: downloads and merges accesskey bundles
//! - [`CircuitController`]: circuit cache, rebuilds and invalidation
//! - [`CircuitDialer`]: hop-chaining dial over a [`Transport`]
//!
//! ## Example
//!
//! ```ignore
//! let config = shared_config(Config::load(&*store)?);
//! let api: Arc<dyn ContractApi> = Arc::new(HttpContractApi::new(timeout)?);
//!
//! let credentials = Arc::new(CredentialManager::new(api.clone(), store.clone(), config.clone()));
//! let circuits = Arc::new(CircuitController::new(api, store, config));
//! let dialer = CircuitDialer::new(credentials, circuits, Arc::new(TcpTransport::new(timeout)));
//!
//! let mut stream = dialer.dial("tcp", "example.com:80").await?;
//! ```

mod accesskey;
mod circuit;
mod contract;
mod credential;
mod dialer;
mod frame;
mod path;
mod retry;
mod transport;

pub use accesskey::{import_accesskey, load_tokens, merge_tokens, save_tokens, validate_tokens};
pub use circuit::{trace_origin, CircuitController, CircuitPolicy, CircuitSource, CircuitState};
pub use contract::{
    sync_contract, ActivationError, ActivationGrant, ActivationRequest, ApiError, ContractApi,
    ContractSnapshot, HttpContractApi,
};
pub use credential::{CredentialManager, CredentialSource};
pub use dialer::{CircuitDialer, TunnelStream};
pub use frame::{read_frame, write_frame, FramedStream, MAX_FRAME_LEN};
pub use path::{RandomSelector, RelaySelector};
pub use retry::{RetryPolicy, TokenVerdict};
pub use transport::{AsyncStream, BoxedStream, TcpTransport, Transport};

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use hopwire_core::{CircuitBuildError, CircuitError, CredentialError, PublicKey, TransportError};
use hopwire_settings::Config;

/// Configuration shared between the daemon, the credential manager and the
/// circuit controller. Replaced wholesale on reload.
pub type SharedConfig = Arc<RwLock<Config>>;

pub fn shared_config(config: Config) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// Why a dial failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialError {
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(#[from] CredentialError),

    #[error("Circuit unavailable: {0}")]
    CircuitUnavailable(#[from] CircuitBuildError),

    /// Attributed to one relay of the circuit
    #[error(transparent)]
    Circuit(#[from] CircuitError),

    /// Not attributable to the circuit
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DialError {
    /// Relay the failure is attributed to, if any
    pub fn origin(&self) -> Option<&PublicKey> {
        match self {
            Self::Circuit(e) => Some(&e.origin),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_circuit_errors_carry_origin() {
        let origin = PublicKey([4; 32]);
        let attributed: DialError = CircuitError::new(origin, "refused").into();
        assert_eq!(attributed.origin(), Some(&origin));

        let transport: DialError = TransportError::Timeout("relay".to_string()).into();
        assert_eq!(transport.origin(), None);

        let credential: DialError = CredentialError::NoFreshCredential.into();
        assert!(credential.to_string().starts_with("Credential unavailable"));
    }
}
