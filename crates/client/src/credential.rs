//! Credential cache and refresh
//!
//! A credential is usable while it is bound to a contract and unexpired. When
//! there is none, proof tokens are exchanged for a freshly minted one:
//!
//! 1. read the fresh tokens, importing an accesskey bundle when the set is
//!    empty (at most [`RetryPolicy::max_token_reads`] reads);
//! 2. offer tokens in stored order until one activates. Poisoned tokens are
//!    dropped, tokens that failed for other reasons are kept;
//! 3. persist the filtered token set whether or not a credential was minted;
//! 4. if nothing was minted and no token is left, start over, at most
//!    [`RetryPolicy::max_mint_attempts`] times.
//!
//! Concurrent refreshes are not deduplicated: each runs the whole cycle and
//! the last one to finish wins the cache.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use hopwire_core::{fresh_tokens, unix_now, Credential, CredentialError, ProofToken};
use hopwire_crypto::generate_credential;
use hopwire_store::{names, Store, StoreError, StoreExt};

use crate::accesskey::{import_accesskey, load_tokens, save_tokens};
use crate::contract::{ActivationRequest, ContractApi};
use crate::retry::{RetryPolicy, TokenVerdict};
use crate::SharedConfig;

/// Anything that can hand the dialer a usable credential
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self) -> Result<Credential, CredentialError>;
}

/// Outcome of offering a token set for activation
struct Exchange {
    minted: Option<Credential>,
    /// Tokens to persist: untried, plus those that failed but stay valid
    remaining: Vec<ProofToken>,
    last_failure: Option<CredentialError>,
}

pub struct CredentialManager {
    api: Arc<dyn ContractApi>,
    store: Arc<dyn Store>,
    config: SharedConfig,
    policy: RetryPolicy,
    current: RwLock<Option<Credential>>,
}

impl CredentialManager {
    pub fn new(api: Arc<dyn ContractApi>, store: Arc<dyn Store>, config: SharedConfig) -> Self {
        Self {
            api,
            store,
            config,
            policy: RetryPolicy::default(),
            current: RwLock::new(None),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cached credential, usable or not
    pub fn current(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    /// Return the cached credential if usable, refreshing it on demand
    pub async fn obtain_credential(&self) -> Result<Credential, CredentialError> {
        if let Some(credential) = self.usable()? {
            debug!("Using existing credential {}", credential.public_key);
            return Ok(credential);
        }
        if !self.config.read().accesskey.use_on_demand {
            return Err(CredentialError::NoFreshCredential);
        }
        self.refresh().await
    }

    /// Mint a credential now, regardless of the on-demand setting.
    ///
    /// Refuses to replace a credential that is still usable.
    pub async fn activate_now(&self) -> Result<Credential, CredentialError> {
        if let Some(credential) = self.usable()? {
            return Err(CredentialError::CredentialStillValid {
                expiration: credential.expiration,
            });
        }
        self.refresh().await
    }

    /// The cached or stored credential, if bound and unexpired
    fn usable(&self) -> Result<Option<Credential>, CredentialError> {
        let now = unix_now();
        if let Some(credential) = self.current.read().as_ref() {
            if credential.is_usable_at(now) {
                return Ok(Some(credential.clone()));
            }
        }

        let stored = match self.store.get::<Credential>(names::CREDENTIAL) {
            Ok(stored) => stored,
            Err(e @ StoreError::Parse { .. }) => {
                warn!("Ignoring unreadable credential: {}", e);
                None
            }
            Err(e) => return Err(CredentialError::Storage(e.to_string())),
        };
        match stored {
            Some(credential) if credential.is_usable_at(now) => {
                *self.current.write() = Some(credential.clone());
                Ok(Some(credential))
            }
            _ => Ok(None),
        }
    }

    /// Run the refresh state machine
    pub async fn refresh(&self) -> Result<Credential, CredentialError> {
        for attempt in 1..=self.policy.max_mint_attempts {
            let tokens = self.acquire_tokens().await?;
            let contract = self
                .config
                .read()
                .contract
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    CredentialError::NoCredentialAvailable("contract is not defined".to_string())
                })?;

            let Exchange {
                minted,
                remaining,
                last_failure,
            } = self.exchange(&contract, tokens).await;
            save_tokens(&*self.store, &remaining)?;

            match minted {
                Some(credential) => {
                    self.store
                        .set(names::CREDENTIAL, &credential)
                        .map_err(|e| CredentialError::Storage(e.to_string()))?;
                    info!(
                        "Activated credential {} valid until {}",
                        credential.public_key, credential.expiration
                    );
                    *self.current.write() = Some(credential.clone());
                    return Ok(credential);
                }
                None if remaining.is_empty() => {
                    warn!(
                        "Attempt {}/{}: token set exhausted without a credential",
                        attempt, self.policy.max_mint_attempts
                    );
                }
                None => {
                    let cause = last_failure
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no activation attempted".to_string());
                    return Err(CredentialError::NoCredentialAvailable(format!(
                        "{} proof tokens kept after failed activations: {}",
                        remaining.len(),
                        cause
                    )));
                }
            }
        }
        Err(CredentialError::NoProofTokensAvailable)
    }

    /// Read fresh tokens, importing a bundle between empty reads
    async fn acquire_tokens(&self) -> Result<Vec<ProofToken>, CredentialError> {
        for read in 1..=self.policy.max_token_reads {
            let tokens = fresh_tokens(load_tokens(&*self.store)?, unix_now());
            if !tokens.is_empty() {
                return Ok(tokens);
            }
            if read == self.policy.max_token_reads {
                break;
            }

            let url = self.config.read().pof_url.clone();
            let Some(url) = url else {
                warn!("No fresh proof tokens and no pof_url configured");
                continue;
            };
            if let Err(e) = import_accesskey(&*self.api, &*self.store, &self.config, &url).await {
                if self.policy.import_is_fatal(&e) {
                    return Err(e);
                }
                warn!("Accesskey import failed: {}", e);
            }
        }
        Err(CredentialError::NoProofTokensAvailable)
    }

    /// Offer tokens in order until one activates
    async fn exchange(&self, contract: &str, tokens: Vec<ProofToken>) -> Exchange {
        let mut remaining = Vec::with_capacity(tokens.len());
        let mut last_failure = None;
        let mut tokens = tokens.into_iter();

        while let Some(token) = tokens.next() {
            let digest = token.digest();
            debug!("Generating new credential from proof token {}", digest);

            let mut credential = generate_credential();
            let request = ActivationRequest {
                public_key: credential.public_key,
                proof_token: token,
            };
            match self.api.activate(contract, &request).await {
                Ok(grant) => {
                    debug!("Proof token {} consumed", digest);
                    credential.contract = Some(grant.contract);
                    credential.expiration = grant.expiration;
                    remaining.extend(tokens);
                    return Exchange {
                        minted: Some(credential),
                        remaining,
                        last_failure,
                    };
                }
                Err(e) => {
                    warn!("Failed generating credential from proof token {}: {}", digest, e);
                    if TokenVerdict::of_failure(&e).keeps_token() {
                        remaining.push(request.proof_token);
                    } else {
                        debug!("Dropping poisoned proof token {}", digest);
                    }
                    last_failure = Some(CredentialError::from(e));
                }
            }
        }
        Exchange {
            minted: None,
            remaining,
            last_failure,
        }
    }
}

#[async_trait]
impl CredentialSource for CredentialManager {
    async fn credential(&self) -> Result<Credential, CredentialError> {
        self.obtain_credential().await
    }
}
