use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::{CircuitBuildError, CredentialError};

/// Seconds since the Unix epoch
pub type UnixTime = i64;

/// Current wall-clock time as Unix seconds
pub fn unix_now() -> UnixTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// 32-byte Ed25519 public key.
///
/// Serialized as unpadded URL-safe base64, which is how relays and contracts
/// publish their identities and how relays report error origins.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s.trim_end_matches('='))
            .map_err(|e| format!("invalid public key encoding: {}", e))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("invalid public key length: {}", b.len()))?;
        Ok(Self(key))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of the backing service: endpoint plus public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Service contract base URL
    pub endpoint: String,
    /// Contract signing identity
    pub public_key: PublicKey,
}

/// Live contract metadata as served by the contract itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub endpoint: String,
    pub public_key: PublicKey,
}

impl ContractInfo {
    pub fn contract(&self) -> Contract {
        Contract {
            endpoint: self.endpoint.clone(),
            public_key: self.public_key,
        }
    }
}

/// Relay directory metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryInfo {
    /// Directory base URL
    pub endpoint: String,
}

/// Role a relay plays in a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelayRole {
    /// Entry relay, reachable from clients
    Fronting,
    /// Middle relay
    #[default]
    Entropic,
    /// Exit relay, talks to destinations
    Backing,
}

impl fmt::Display for RelayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fronting => "fronting",
            Self::Entropic => "entropic",
            Self::Backing => "backing",
        };
        f.write_str(s)
    }
}

/// A relay as listed by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEntry {
    /// Relay network address (`scheme://host:port`)
    pub address: String,
    /// Relay identity
    pub public_key: PublicKey,
    #[serde(default)]
    pub role: RelayRole,
}

/// Known relays keyed by address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayList(BTreeMap<String, RelayEntry>);

impl RelayList {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_entries(entries: impl IntoIterator<Item = RelayEntry>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|r| (r.address.clone(), r))
                .collect(),
        )
    }

    pub fn insert(&mut self, relay: RelayEntry) {
        self.0.insert(relay.address.clone(), relay);
    }

    /// Look up a relay by its address
    pub fn get(&self, address: &str) -> Option<&RelayEntry> {
        self.0.get(address)
    }

    /// Every known relay, in address order
    pub fn all(&self) -> Vec<RelayEntry> {
        self.0.values().cloned().collect()
    }

    /// Relays whose address is in `whitelist`, in whitelist order.
    /// Unknown addresses are skipped.
    pub fn whitelisted(&self, whitelist: &[String]) -> Vec<RelayEntry> {
        whitelist
            .iter()
            .filter_map(|addr| self.0.get(addr))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An ordered path of distinct relays, first hop first.
///
/// Built whole and discarded whole; there is no way to mutate a hop in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RelayEntry>", into = "Vec<RelayEntry>")]
pub struct Circuit {
    hops: Vec<RelayEntry>,
}

impl TryFrom<Vec<RelayEntry>> for Circuit {
    type Error = CircuitBuildError;

    fn try_from(hops: Vec<RelayEntry>) -> Result<Self, Self::Error> {
        Self::new(hops)
    }
}

impl From<Circuit> for Vec<RelayEntry> {
    fn from(circuit: Circuit) -> Self {
        circuit.hops
    }
}

impl Circuit {
    /// Build a circuit, rejecting empty paths and repeated relays
    pub fn new(hops: Vec<RelayEntry>) -> Result<Self, CircuitBuildError> {
        if hops.is_empty() {
            return Err(CircuitBuildError::Empty);
        }
        for (i, hop) in hops.iter().enumerate() {
            if hops[..i].iter().any(|h| h.public_key == hop.public_key) {
                return Err(CircuitBuildError::DuplicateRelay(hop.public_key));
            }
        }
        Ok(Self { hops })
    }

    pub fn hops(&self) -> &[RelayEntry] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Entry relay
    pub fn first(&self) -> &RelayEntry {
        &self.hops[0]
    }

    /// Relay that reaches the destination
    pub fn last(&self) -> &RelayEntry {
        &self.hops[self.hops.len() - 1]
    }

    /// Find the hop with the given identity
    pub fn find(&self, public_key: &PublicKey) -> Option<&RelayEntry> {
        self.hops.iter().find(|h| &h.public_key == public_key)
    }

    pub fn contains(&self, public_key: &PublicKey) -> bool {
        self.find(public_key).is_some()
    }
}

/// Ephemeral signing credential ("servicekey").
///
/// Minted locally, then bound to a contract by a successful activation. A
/// credential without a contract binding is never usable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub public_key: PublicKey,
    /// Ed25519 secret key, hex-encoded on disk
    #[serde(with = "hex_secret")]
    pub secret_key: [u8; 32],
    /// Contract this credential was activated against
    #[serde(default)]
    pub contract: Option<Contract>,
    /// Expiration (Unix seconds)
    #[serde(default)]
    pub expiration: UnixTime,
}

impl Credential {
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        self.expiration <= now
    }

    /// Bound to a contract and not yet expired
    pub fn is_usable_at(&self, now: UnixTime) -> bool {
        self.contract.is_some() && !self.is_expired_at(now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("public_key", &self.public_key)
            .field("contract", &self.contract)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

mod hex_secret {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("secret key must be 32 bytes"))
    }
}

/// Pre-purchased, single-use proof token exchanged for a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofToken {
    /// Key of the party that sold the token
    pub issuer: PublicKey,
    /// Unique token nonce
    pub nonce: String,
    /// Expiration (Unix seconds)
    pub expiration: UnixTime,
    /// Issuer signature over the token
    pub signature: String,
}

impl ProofToken {
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        self.expiration <= now
    }

    /// Content digest, the token's identity for deduplication
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.issuer.as_bytes());
        hasher.update(self.nonce.as_bytes());
        hasher.update(self.expiration.to_be_bytes());
        hasher.update(self.signature.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Keep only tokens that have not expired at `now`
pub fn fresh_tokens(tokens: Vec<ProofToken>, now: UnixTime) -> Vec<ProofToken> {
    tokens.into_iter().filter(|t| !t.is_expired_at(now)).collect()
}

/// Contract reference inside an accesskey bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyContract {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub public_key: Option<PublicKey>,
}

/// Externally distributed credential bundle ("accesskey")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    #[serde(default)]
    pub contract: Option<AccessKeyContract>,
    #[serde(default)]
    pub proof_tokens: Option<Vec<ProofToken>>,
}

impl AccessKey {
    /// Check that endpoint, public key and token list are all present
    pub fn validate(self) -> Result<(Contract, Vec<ProofToken>), CredentialError> {
        let contract = self
            .contract
            .ok_or_else(|| CredentialError::MalformedBundle("missing contract".to_string()))?;
        let endpoint = contract
            .endpoint
            .ok_or_else(|| CredentialError::MalformedBundle("missing contract endpoint".to_string()))?;
        let public_key = contract.public_key.ok_or_else(|| {
            CredentialError::MalformedBundle("missing contract public key".to_string())
        })?;
        let tokens = self
            .proof_tokens
            .ok_or_else(|| CredentialError::MalformedBundle("missing proof tokens".to_string()))?;
        Ok((
            Contract {
                endpoint,
                public_key,
            },
            tokens,
        ))
    }
}

/// Hostnames that must not be routed through the tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BypassSet(Vec<String>);

impl BypassSet {
    /// Collect hostnames, dropping blanks and repeats while keeping order
    pub fn from_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for host in hosts {
            let host = host.into();
            if !host.is_empty() && !out.contains(&host) {
                out.push(host);
            }
        }
        Self(out)
    }

    pub fn hosts(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, host: &str) -> bool {
        self.0.iter().any(|h| h == host)
    }
}

/// Single-use token authorising one tunnel-extension step.
///
/// Bound to the credential that signed it and to the relay that must
/// accept it; relays reject a token presented to any other identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopToken {
    /// Credential public key (the signer)
    pub credential: PublicKey,
    /// Contract the credential is bound to
    pub contract: PublicKey,
    /// Relay this token is addressed to
    pub relay: PublicKey,
    /// Random per-request nonce, hex-encoded
    pub nonce: String,
    pub issued_at: UnixTime,
    /// Credential expiration carried forward
    pub expiration: UnixTime,
    /// Ed25519 signature over the fields above, hex-encoded
    pub signature: String,
}
