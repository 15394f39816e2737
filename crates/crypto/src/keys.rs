use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use hopwire_core::{Credential, PublicKey, UnixTime};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Credential secret does not match its public key")]
    CredentialKeyMismatch,
    #[error("Credential is not bound to a contract")]
    UnboundCredential,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Hop token is addressed to relay {0}")]
    WrongRelay(PublicKey),
    #[error("Hop token expired at {0}")]
    Expired(UnixTime),
}

/// Keypair for signing (Ed25519)
pub struct SigningKeypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl std::fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("verifying_key", &self.verifying_key)
            .finish_non_exhaustive()
    }
}

impl Clone for SigningKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
            verifying_key: self.verifying_key,
        }
    }
}

impl SigningKeypair {
    /// Generate a new random signing keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get the public key as bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public_key_bytes())
    }

    /// Get the secret key as bytes
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Create from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Recover the keypair stored in a credential, checking it is self-consistent
    pub fn from_credential(credential: &Credential) -> Result<Self, KeyError> {
        let keypair = Self::from_secret_bytes(&credential.secret_key);
        if keypair.public_key() != credential.public_key {
            return Err(KeyError::CredentialKeyMismatch);
        }
        Ok(keypair)
    }
}

/// Mint a fresh, not-yet-activated credential.
///
/// The result has no contract binding and is unusable until an activation
/// grant fills in the contract and expiration.
pub fn generate_credential() -> Credential {
    let keypair = SigningKeypair::generate();
    Credential {
        public_key: keypair.public_key(),
        secret_key: keypair.secret_key_bytes(),
        contract: None,
        expiration: 0,
    }
}
