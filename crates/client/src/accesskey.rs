//! Accesskey import and the persisted proof token set

use std::collections::HashSet;

use tracing::{debug, info, warn};

use hopwire_core::{fresh_tokens, unix_now, AccessKey, CredentialError, ProofToken, UnixTime};
use hopwire_store::{names, Store, StoreExt};

use crate::contract::{ContractApi, ContractSnapshot};
use crate::SharedConfig;

fn storage(e: impl std::fmt::Display) -> CredentialError {
    CredentialError::Storage(e.to_string())
}

/// Read the persisted token set; an absent set is empty
pub fn load_tokens(store: &dyn Store) -> Result<Vec<ProofToken>, CredentialError> {
    Ok(store
        .get::<Vec<ProofToken>>(names::PROOF_TOKENS)
        .map_err(storage)?
        .unwrap_or_default())
}

pub fn save_tokens(store: &dyn Store, tokens: &[ProofToken]) -> Result<(), CredentialError> {
    store.set(names::PROOF_TOKENS, tokens).map_err(storage)
}

/// Append `incoming` to `existing`, skipping expired tokens and digests
/// already present. Returns the number of tokens added.
pub fn merge_tokens(
    existing: &mut Vec<ProofToken>,
    incoming: Vec<ProofToken>,
    now: UnixTime,
) -> usize {
    let mut digests: HashSet<String> = existing.iter().map(ProofToken::digest).collect();
    let mut added = 0;
    for token in incoming {
        if token.is_expired_at(now) {
            debug!("Skipping expired proof token {}", token.digest());
            continue;
        }
        if !digests.insert(token.digest()) {
            debug!("Skipping duplicate proof token {}", token.digest());
            continue;
        }
        existing.push(token);
        added += 1;
    }
    added
}

/// Download an accesskey bundle from `url` and merge its proof tokens.
///
/// Adopts the bundle's contract when none is configured; refuses bundles for
/// a different contract, and bundles whose embedded contract key differs
/// from the one the live contract serves. Returns the number of new tokens.
pub async fn import_accesskey(
    api: &dyn ContractApi,
    store: &dyn Store,
    config: &SharedConfig,
    url: &str,
) -> Result<usize, CredentialError> {
    info!("Importing accesskey from {}", url);
    let data = api
        .download(url)
        .await
        .map_err(|e| CredentialError::BundleUnavailable(e.to_string()))?;
    let bundle: AccessKey = serde_json::from_slice(&data)
        .map_err(|e| CredentialError::MalformedBundle(e.to_string()))?;
    let (contract, tokens) = bundle.validate()?;

    let configured = config.read().contract.clone().filter(|c| !c.is_empty());
    match configured {
        None => {
            let mut config = config.write();
            config.contract = Some(contract.endpoint.clone());
            config.save(store).map_err(storage)?;
            info!("Contract set to {}", contract.endpoint);
        }
        Some(configured) if configured != contract.endpoint => {
            return Err(CredentialError::ContractMismatch {
                configured,
                bundle: contract.endpoint,
            });
        }
        Some(_) => {}
    }

    let unavailable = |e: crate::ApiError| CredentialError::ContractUnavailable(e.to_string());
    let info = api
        .contract_info(&contract.endpoint)
        .await
        .map_err(unavailable)?;
    if info.public_key != contract.public_key {
        return Err(CredentialError::ContractKeyMismatch {
            expected: contract.public_key,
            live: info.public_key,
        });
    }
    ContractSnapshot::fetch_with(api, &contract.endpoint, info)
        .await
        .map_err(unavailable)?
        .save(store)
        .map_err(storage)?;

    let mut existing = load_tokens(store)?;
    let offered = tokens.len();
    let added = merge_tokens(&mut existing, tokens, unix_now());
    save_tokens(store, &existing)?;
    info!(
        "Imported {} of {} proof tokens ({} stored)",
        added,
        offered,
        existing.len()
    );
    Ok(added)
}

/// Make sure at least one fresh proof token is stored, importing from
/// `pof_url` when there is none. Returns the number of fresh tokens.
pub async fn validate_tokens(
    api: &dyn ContractApi,
    store: &dyn Store,
    config: &SharedConfig,
) -> Result<usize, CredentialError> {
    let fresh = fresh_tokens(load_tokens(store)?, unix_now()).len();
    if fresh > 0 {
        debug!("{} fresh proof tokens available", fresh);
        return Ok(fresh);
    }

    let url = config.read().pof_url.clone();
    let Some(url) = url else {
        warn!("No fresh proof tokens and no pof_url configured");
        return Err(CredentialError::NoProofTokensAvailable);
    };
    import_accesskey(api, store, config, &url).await?;

    match fresh_tokens(load_tokens(store)?, unix_now()).len() {
        0 => Err(CredentialError::NoProofTokensAvailable),
        n => Ok(n),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::contract::{ActivationError, ActivationGrant, ActivationRequest, ApiError};
    use crate::shared_config;
    use async_trait::async_trait;
    use hopwire_core::{ContractInfo, DirectoryInfo, PublicKey, RelayEntry, RelayList, RelayRole};
    use hopwire_settings::Config;
    use hopwire_store::MemoryStore;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const CONTRACT: &str = "https://contract.example";
    pub const POF_URL: &str = "https://shop.example/buy?quantity=1";

    pub fn token(nonce: &str) -> ProofToken {
        ProofToken {
            issuer: PublicKey([9; 32]),
            nonce: nonce.to_string(),
            expiration: unix_now() + 3600,
            signature: "sig".to_string(),
        }
    }

    pub fn bundle(endpoint: &str, key: PublicKey, tokens: &[ProofToken]) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "contract": { "endpoint": endpoint, "public_key": key },
            "proof_tokens": tokens,
        }))
        .unwrap()
    }

    /// Scripted contract: queued bundles and activation outcomes
    pub struct MockApi {
        pub contract_key: PublicKey,
        pub bundles: Mutex<VecDeque<Vec<u8>>>,
        pub activations: Mutex<VecDeque<Result<ActivationGrant, ActivationError>>>,
        pub activated: Mutex<Vec<ProofToken>>,
        pub relays: RelayList,
        pub calls: AtomicUsize,
    }

    impl MockApi {
        pub fn new() -> Self {
            Self {
                contract_key: PublicKey([1; 32]),
                bundles: Mutex::new(VecDeque::new()),
                activations: Mutex::new(VecDeque::new()),
                activated: Mutex::new(Vec::new()),
                relays: RelayList::from_entries((1..=5u8).map(|i| RelayEntry {
                    address: format!("tcp://relay{}.example:13490", i),
                    public_key: PublicKey([10 + i; 32]),
                    role: RelayRole::Fronting,
                })),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn grant(&self) -> ActivationGrant {
            ActivationGrant {
                contract: hopwire_core::Contract {
                    endpoint: CONTRACT.to_string(),
                    public_key: self.contract_key,
                },
                expiration: unix_now() + 3600,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContractApi for MockApi {
        async fn contract_info(&self, contract: &str) -> Result<ContractInfo, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ContractInfo {
                endpoint: contract.to_string(),
                public_key: self.contract_key,
            })
        }

        async fn relays(&self, _contract: &str) -> Result<RelayList, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.relays.clone())
        }

        async fn directory_info(&self, _contract: &str) -> Result<DirectoryInfo, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DirectoryInfo {
                endpoint: "https://directory.example:3002".to_string(),
            })
        }

        async fn activate(
            &self,
            _contract: &str,
            request: &ActivationRequest,
        ) -> Result<ActivationGrant, ActivationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.activated.lock().push(request.proof_token.clone());
            self.activations
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(self.grant()))
        }

        async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bundles.lock().pop_front().ok_or(ApiError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn configured(contract: Option<&str>) -> SharedConfig {
        shared_config(Config {
            contract: contract.map(str::to_string),
            pof_url: Some(POF_URL.to_string()),
            ..Config::default()
        })
    }

    #[test]
    fn test_merge_skips_expired_and_duplicates() {
        let now = unix_now();
        let mut existing = vec![token("a")];
        let mut expired = token("b");
        expired.expiration = now - 1;

        let added = merge_tokens(&mut existing, vec![token("a"), expired, token("c")], now);
        assert_eq!(added, 1);
        assert_eq!(existing, vec![token("a"), token("c")]);
    }

    #[tokio::test]
    async fn test_import_adopts_contract() {
        let api = MockApi::new();
        api.bundles
            .lock()
            .push_back(bundle(CONTRACT, api.contract_key, &[token("a"), token("b")]));
        let store = MemoryStore::new();
        let config = configured(None);

        let added = import_accesskey(&api, &store, &config, POF_URL).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(config.read().contract.as_deref(), Some(CONTRACT));
        assert_eq!(Config::load(&store).unwrap().contract.as_deref(), Some(CONTRACT));
        assert_eq!(load_tokens(&store).unwrap().len(), 2);
        assert!(store.contains(names::CONTRACT));
        assert!(store.contains(names::RELAYS));
    }

    #[tokio::test]
    async fn test_import_duplicate_leaves_set_unchanged() {
        let api = MockApi::new();
        let store = MemoryStore::new();
        save_tokens(&store, &[token("a")]).unwrap();
        api.bundles
            .lock()
            .push_back(bundle(CONTRACT, api.contract_key, &[token("a")]));

        let added = import_accesskey(&api, &store, &configured(Some(CONTRACT)), POF_URL)
            .await
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(load_tokens(&store).unwrap(), vec![token("a")]);
    }

    #[tokio::test]
    async fn test_import_rejects_other_contract() {
        let api = MockApi::new();
        api.bundles.lock().push_back(bundle(
            "https://other.example",
            api.contract_key,
            &[token("a")],
        ));
        let store = MemoryStore::new();

        let err = import_accesskey(&api, &store, &configured(Some(CONTRACT)), POF_URL)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::ContractMismatch { .. }));
        assert!(load_tokens(&store).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_rejects_substituted_contract_key() {
        let api = MockApi::new();
        api.bundles
            .lock()
            .push_back(bundle(CONTRACT, PublicKey([66; 32]), &[token("a")]));
        let store = MemoryStore::new();

        let err = import_accesskey(&api, &store, &configured(Some(CONTRACT)), POF_URL)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CredentialError::ContractKeyMismatch {
                expected: PublicKey([66; 32]),
                live: api.contract_key,
            }
        );
        assert!(load_tokens(&store).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_malformed_bundle() {
        let api = MockApi::new();
        api.bundles
            .lock()
            .push_back(br#"{"contract": {"endpoint": "https://contract.example"}}"#.to_vec());
        let store = MemoryStore::new();

        let err = import_accesskey(&api, &store, &configured(Some(CONTRACT)), POF_URL)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::MalformedBundle(_)));
    }

    #[tokio::test]
    async fn test_validate_tokens_imports_when_empty() {
        let api = MockApi::new();
        api.bundles
            .lock()
            .push_back(bundle(CONTRACT, api.contract_key, &[token("a")]));
        let store = MemoryStore::new();
        let config = configured(Some(CONTRACT));

        assert_eq!(validate_tokens(&api, &store, &config).await.unwrap(), 1);
        // Second call finds the stored token without downloading
        let calls = api.calls();
        assert_eq!(validate_tokens(&api, &store, &config).await.unwrap(), 1);
        assert_eq!(api.calls(), calls);
    }
}
