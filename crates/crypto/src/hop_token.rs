//! Hop token derivation
//!
//! A hop token authorises exactly one tunnel-extension step. It is signed by
//! the current credential and names the relay that must accept it, so a relay
//! cannot replay a token it received into another relay's session. A fresh
//! random nonce makes every token distinct, even for the same relay.

use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use rand::RngCore;

use hopwire_core::{unix_now, Credential, HopToken, PublicKey, UnixTime};

use crate::keys::{KeyError, SigningKeypair};

const HOP_TOKEN_DOMAIN: &[u8] = b"hopwire-hop-token-v1";

/// Bytes covered by the token signature
fn signable_bytes(
    credential: &PublicKey,
    contract: &PublicKey,
    relay: &PublicKey,
    nonce: &str,
    issued_at: UnixTime,
    expiration: UnixTime,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(HOP_TOKEN_DOMAIN.len() + 96 + nonce.len() + 16);
    data.extend_from_slice(HOP_TOKEN_DOMAIN);
    data.extend_from_slice(credential.as_bytes());
    data.extend_from_slice(contract.as_bytes());
    data.extend_from_slice(relay.as_bytes());
    data.extend_from_slice(nonce.as_bytes());
    data.extend_from_slice(&issued_at.to_be_bytes());
    data.extend_from_slice(&expiration.to_be_bytes());
    data
}

/// Derive a single-use token for the relay identified by `relay`
pub fn derive_hop_token(credential: &Credential, relay: &PublicKey) -> Result<HopToken, KeyError> {
    let contract = credential
        .contract
        .as_ref()
        .ok_or(KeyError::UnboundCredential)?;
    let keypair = SigningKeypair::from_credential(credential)?;

    let mut nonce_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = hex::encode(nonce_bytes);
    let issued_at = unix_now();

    let data = signable_bytes(
        &credential.public_key,
        &contract.public_key,
        relay,
        &nonce,
        issued_at,
        credential.expiration,
    );
    let signature: Signature = keypair.signing_key.sign(&data);

    Ok(HopToken {
        credential: credential.public_key,
        contract: contract.public_key,
        relay: *relay,
        nonce,
        issued_at,
        expiration: credential.expiration,
        signature: hex::encode(signature.to_bytes()),
    })
}

/// Verify a token as the relay `relay` would: signature, addressee and expiry
pub fn verify_hop_token(token: &HopToken, relay: &PublicKey, now: UnixTime) -> Result<(), KeyError> {
    if &token.relay != relay {
        return Err(KeyError::WrongRelay(token.relay));
    }
    if token.expiration <= now {
        return Err(KeyError::Expired(token.expiration));
    }
    let verifying_key =
        VerifyingKey::from_bytes(token.credential.as_bytes()).map_err(|_| KeyError::InvalidPublicKey)?;
    let sig_bytes: [u8; 64] = hex::decode(&token.signature)
        .map_err(|_| KeyError::InvalidSignature)?
        .try_into()
        .map_err(|_| KeyError::InvalidSignature)?;
    let data = signable_bytes(
        &token.credential,
        &token.contract,
        &token.relay,
        &token.nonce,
        token.issued_at,
        token.expiration,
    );
    verifying_key
        .verify(&data, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| KeyError::InvalidSignature)
}
