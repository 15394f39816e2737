//! Hopwire Cryptography
//!
//! Ed25519 keypairs for credentials and hop token derivation.

mod hop_token;
mod keys;

pub use hop_token::*;
pub use keys::*;
