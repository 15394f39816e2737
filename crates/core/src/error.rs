use thiserror::Error;

use crate::{PublicKey, UnixTime};

/// Startup configuration problems. Fatal, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Contract is not defined")]
    MissingContract,

    #[error("No listening address configured: set address.socks and/or address.h2c")]
    MissingListenAddress,

    #[error("Invalid hop count {0}: must be at least 1")]
    InvalidHops(usize),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Failures of the credential lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("No fresh credential available and accesskey.use_on_demand is false")]
    NoFreshCredential,

    #[error("No proof tokens available")]
    NoProofTokensAvailable,

    #[error("No credential available: {0}")]
    NoCredentialAvailable(String),

    #[error("Credential activation failed: {0}")]
    ActivationFailed(String),

    #[error("Accesskey is for contract {bundle}, different from the configured {configured}")]
    ContractMismatch { configured: String, bundle: String },

    #[error("Contract public key mismatch: expected {expected} from accesskey, got {live} from live contract")]
    ContractKeyMismatch { expected: PublicKey, live: PublicKey },

    #[error("Malformed accesskey: {0}")]
    MalformedBundle(String),

    #[error("Refusing to replace credential valid until {expiration}")]
    CredentialStillValid { expiration: UnixTime },

    #[error("Accesskey unavailable: {0}")]
    BundleUnavailable(String),

    #[error("Contract unavailable: {0}")]
    ContractUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// A failure attributed to a specific relay of the circuit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit error from relay {origin}: {description}")]
pub struct CircuitError {
    /// Identity of the relay the failure is attributed to
    pub origin: PublicKey,
    pub description: String,
}

impl CircuitError {
    pub fn new(origin: PublicKey, description: impl Into<String>) -> Self {
        Self {
            origin,
            description: description.into(),
        }
    }
}

/// Failures to produce a circuit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBuildError {
    #[error("Insufficient relays: need {need} but only {available} available")]
    InsufficientRelays { need: usize, available: usize },

    #[error("Relay selection returned {got} hops, need {need}")]
    WrongLength { need: usize, got: usize },

    #[error("Circuit must contain at least one hop")]
    Empty,

    #[error("Relay {0} appears more than once in circuit")]
    DuplicateRelay(PublicKey),

    #[error("Contract is not defined")]
    MissingContract,

    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Generic, unattributed network failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Dial {address} failed: {reason}")]
    Dial { address: String, reason: String },

    #[error("Timeout talking to {0}")]
    Timeout(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Rejected with status {code}: {description}")]
    Rejected { code: u16, description: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}
