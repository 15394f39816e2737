//! Service contract HTTP API
//!
//! Every remote call the client makes outside the tunnel goes through
//! [`ContractApi`]: contract metadata, the relay directory, credential
//! activation and accesskey downloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use hopwire_core::{
    CircuitBuildError, Contract, ContractInfo, CredentialError, DirectoryInfo, ProofToken,
    PublicKey, RelayEntry, RelayList, UnixTime,
};
use hopwire_store::{names, Store, StoreExt};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Outcome classes of a failed activation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivationError {
    /// The token was rejected as invalid or already consumed
    #[error("Proof token rejected: {0}")]
    Poisoned(String),

    /// Anything else; the token may still be good
    #[error("Activation failed: {0}")]
    Failed(String),
}

impl ActivationError {
    /// Classify an HTTP failure status
    pub fn from_status(status: u16, body: &str) -> Self {
        let reason = format!("status {}: {}", status, body.trim());
        match status {
            402 | 403 | 409 => Self::Poisoned(reason),
            _ => Self::Failed(reason),
        }
    }
}

impl From<ActivationError> for CredentialError {
    fn from(err: ActivationError) -> Self {
        match err {
            ActivationError::Poisoned(reason) | ActivationError::Failed(reason) => {
                CredentialError::ActivationFailed(reason)
            }
        }
    }
}

/// Body of `POST {contract}/servicekey/activate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub public_key: PublicKey,
    pub proof_token: ProofToken,
}

/// Contract binding granted to an activated credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationGrant {
    pub contract: Contract,
    pub expiration: UnixTime,
}

#[async_trait]
pub trait ContractApi: Send + Sync {
    async fn contract_info(&self, contract: &str) -> Result<ContractInfo, ApiError>;

    async fn relays(&self, contract: &str) -> Result<RelayList, ApiError>;

    async fn directory_info(&self, contract: &str) -> Result<DirectoryInfo, ApiError>;

    async fn activate(
        &self,
        contract: &str,
        request: &ActivationRequest,
    ) -> Result<ActivationGrant, ActivationError>;

    /// Fetch a raw document, typically an accesskey bundle
    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// [`ContractApi`] over HTTP
pub struct HttpContractApi {
    http_client: reqwest::Client,
}

impl HttpContractApi {
    /// Every request is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Request {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { http_client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ApiError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if response.status() != StatusCode::OK {
            return Err(ApiError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.get(url)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ContractApi for HttpContractApi {
    async fn contract_info(&self, contract: &str) -> Result<ContractInfo, ApiError> {
        self.get_json(&endpoint(contract, "info")).await
    }

    async fn relays(&self, contract: &str) -> Result<RelayList, ApiError> {
        let entries: Vec<RelayEntry> = self.get_json(&endpoint(contract, "relays")).await?;
        Ok(RelayList::from_entries(entries))
    }

    async fn directory_info(&self, contract: &str) -> Result<DirectoryInfo, ApiError> {
        self.get_json(&endpoint(contract, "directory/info")).await
    }

    async fn activate(
        &self,
        contract: &str,
        request: &ActivationRequest,
    ) -> Result<ActivationGrant, ActivationError> {
        let url = endpoint(contract, "servicekey/activate");
        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ActivationError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ActivationError::from_status(status.as_u16(), &body));
        }
        response
            .json::<ActivationGrant>()
            .await
            .map_err(|e| ActivationError::Failed(format!("invalid grant: {}", e)))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| ApiError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

/// Contract, directory and relay metadata fetched together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSnapshot {
    pub info: ContractInfo,
    pub directory: DirectoryInfo,
    pub relays: RelayList,
}

impl ContractSnapshot {
    /// Complete an already fetched contract info with directory and relays
    pub async fn fetch_with(
        api: &dyn ContractApi,
        contract: &str,
        info: ContractInfo,
    ) -> Result<Self, ApiError> {
        let directory = api.directory_info(contract).await?;
        let relays = api.relays(contract).await?;
        Ok(Self {
            info,
            directory,
            relays,
        })
    }

    pub fn save(&self, store: &dyn Store) -> hopwire_store::Result<()> {
        store.set(names::CONTRACT, &self.info)?;
        store.set(names::DIRECTORY, &self.directory)?;
        store.set(names::RELAYS, &self.relays)?;
        debug!(
            "Contract {} saved: directory {}, {} relays",
            self.info.endpoint,
            self.directory.endpoint,
            self.relays.len()
        );
        Ok(())
    }
}

/// Fetch contract info, directory info and the relay list, and cache all
/// three in the store.
pub async fn sync_contract(
    api: &dyn ContractApi,
    store: &dyn Store,
    contract: &str,
) -> Result<ContractSnapshot, CircuitBuildError> {
    let unavailable = |e: ApiError| CircuitBuildError::DirectoryUnavailable(e.to_string());
    let storage = |e: hopwire_store::StoreError| CircuitBuildError::Storage(e.to_string());

    let info = api.contract_info(contract).await.map_err(unavailable)?;
    let snapshot = ContractSnapshot::fetch_with(api, contract, info)
        .await
        .map_err(unavailable)?;
    snapshot.save(store).map_err(storage)?;
    info!("Synced contract info from {}", contract);
    Ok(snapshot)
}
