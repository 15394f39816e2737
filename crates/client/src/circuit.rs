//! Circuit cache and invalidation
//!
//! The controller owns the one circuit every dial goes through. All reads,
//! rebuilds and invalidations pass through a single async mutex, so a rebuild
//! started by one caller completes before any other caller sees the cache.
//!
//! ```text
//! Unbuilt ──circuit()──▶ Built ──report(origin in circuit)──▶ Invalidated
//!                          ▲        reload() / config change      │
//!                          └──────────────circuit()───────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hopwire_core::{BypassSet, Circuit, CircuitBuildError, CircuitError, RelayEntry, RelayList};
use hopwire_settings::Config;
use hopwire_store::{names, Store, StoreExt};

use crate::contract::{sync_contract, ContractApi};
use crate::path::{RandomSelector, RelaySelector};
use crate::{DialError, SharedConfig};

/// Anything that can hand the dialer a circuit
#[async_trait]
pub trait CircuitSource: Send + Sync {
    async fn circuit(&self) -> Result<Circuit, CircuitBuildError>;

    /// Feed a dial failure back; returns whether the circuit was dropped
    async fn report(&self, _err: &DialError) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Unbuilt,
    Built,
    Invalidated,
}

/// Hop count and relay whitelist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub hops: usize,
    /// Empty means every known relay is a candidate
    pub whitelist: Vec<String>,
}

impl CircuitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hops: config.circuit.hops,
            whitelist: config.whitelist().to_vec(),
        }
    }

    /// Candidate relays under this policy
    pub fn pool(&self, relays: &RelayList) -> Vec<RelayEntry> {
        if self.whitelist.is_empty() {
            relays.all()
        } else {
            relays.whitelisted(&self.whitelist)
        }
    }
}

/// Relay of `circuit` a circuit error is attributed to
pub fn trace_origin<'a>(err: &CircuitError, circuit: &'a Circuit) -> Option<&'a RelayEntry> {
    circuit.find(&err.origin)
}

/// Host part of a URL or `scheme://host:port` address
fn host_of(address: &str) -> Option<String> {
    if address.contains("://") {
        return reqwest::Url::parse(address)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_matches(&['[', ']'][..]).to_string()));
    }
    let host = match address.rsplit_once(':') {
        Some((host, _port)) => host,
        None => address,
    };
    Some(host.trim_matches(&['[', ']'][..]).to_string()).filter(|h| !h.is_empty())
}

struct Inner {
    state: CircuitState,
    circuit: Option<Circuit>,
    bypass: BypassSet,
}

impl Inner {
    fn invalidate(&mut self) {
        if self.circuit.take().is_some() {
            self.state = CircuitState::Invalidated;
        }
    }
}

pub struct CircuitController {
    api: Arc<dyn ContractApi>,
    store: Arc<dyn Store>,
    config: SharedConfig,
    selector: Box<dyn RelaySelector>,
    inner: Mutex<Inner>,
}

impl CircuitController {
    pub fn new(api: Arc<dyn ContractApi>, store: Arc<dyn Store>, config: SharedConfig) -> Self {
        Self::with_selector(api, store, config, Box::new(RandomSelector))
    }

    pub fn with_selector(
        api: Arc<dyn ContractApi>,
        store: Arc<dyn Store>,
        config: SharedConfig,
        selector: Box<dyn RelaySelector>,
    ) -> Self {
        Self {
            api,
            store,
            config,
            selector,
            inner: Mutex::new(Inner {
                state: CircuitState::Unbuilt,
                circuit: None,
                bypass: BypassSet::default(),
            }),
        }
    }

    /// Cached circuit, building one if there is none
    pub async fn circuit(&self) -> Result<Circuit, CircuitBuildError> {
        let mut inner = self.inner.lock().await;
        if let Some(circuit) = &inner.circuit {
            return Ok(circuit.clone());
        }

        let (circuit, bypass) = self.build().await?;
        inner.circuit = Some(circuit.clone());
        inner.bypass = bypass;
        inner.state = CircuitState::Built;
        Ok(circuit)
    }

    async fn build(&self) -> Result<(Circuit, BypassSet), CircuitBuildError> {
        let config = self.config.read().clone();
        let contract = config
            .contract
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or(CircuitBuildError::MissingContract)?;

        let snapshot = sync_contract(&*self.api, &*self.store, &contract).await?;
        let policy = CircuitPolicy::from_config(&config);
        let pool = policy.pool(&snapshot.relays);
        debug!(
            "Selecting {} hops from {} candidate relays",
            policy.hops,
            pool.len()
        );
        let path = self.selector.select(policy.hops, &pool)?;
        if path.len() != policy.hops {
            return Err(CircuitBuildError::WrongLength {
                need: policy.hops,
                got: path.len(),
            });
        }
        let circuit = Circuit::new(path)?;

        let bypass = BypassSet::from_hosts(
            [
                host_of(&contract),
                host_of(&snapshot.directory.endpoint),
                host_of(&circuit.first().address),
            ]
            .into_iter()
            .flatten(),
        );
        self.store
            .set(names::BYPASS, &bypass)
            .map_err(|e| CircuitBuildError::Storage(e.to_string()))?;

        for hop in circuit.hops() {
            debug!("Circuit hop {} {} ({})", hop.role, hop.address, hop.public_key);
        }
        info!("Built circuit with {} hops", circuit.len());
        Ok((circuit, bypass))
    }

    /// Drop the cached circuit if `err` is attributed to one of its relays
    pub async fn report(&self, err: &DialError) -> bool {
        let DialError::Circuit(circuit_err) = err else {
            debug!("Not a circuit error, keeping circuit: {}", err);
            return false;
        };

        let mut inner = self.inner.lock().await;
        let traced = inner
            .circuit
            .as_ref()
            .and_then(|c| trace_origin(circuit_err, c))
            .is_some();
        if traced {
            warn!(
                "Relay-originated circuit error from {}, resetting circuit: {}",
                circuit_err.origin, circuit_err.description
            );
            inner.invalidate();
        } else {
            debug!(
                "Circuit error from {} is not in the current circuit",
                circuit_err.origin
            );
        }
        traced
    }

    /// Discard the cached circuit
    pub async fn invalidate(&self) {
        self.inner.lock().await.invalidate();
    }

    /// Adopt `config`, refresh contract metadata and drop the circuit, all
    /// under the circuit lock. Nothing changes if the refresh fails.
    pub async fn reload(&self, config: Config) -> Result<(), CircuitBuildError> {
        let mut inner = self.inner.lock().await;
        let contract = config
            .contract
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or(CircuitBuildError::MissingContract)?;
        sync_contract(&*self.api, &*self.store, &contract).await?;
        *self.config.write() = config;
        inner.invalidate();
        info!("Circuit reset on reload");
        Ok(())
    }

    /// Swap in a new configuration, dropping the circuit if its shape changed
    pub async fn update_config(&self, config: Config) {
        let mut inner = self.inner.lock().await;
        let changed = self.config.read().circuit_changed(&config);
        *self.config.write() = config;
        if changed {
            info!("Circuit settings changed, resetting circuit");
            inner.invalidate();
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Hostnames to keep out of the tunnel, as of the last build
    pub async fn bypass(&self) -> BypassSet {
        self.inner.lock().await.bypass.clone()
    }
}

#[async_trait]
impl CircuitSource for CircuitController {
    async fn circuit(&self) -> Result<Circuit, CircuitBuildError> {
        CircuitController::circuit(self).await
    }

    async fn report(&self, err: &DialError) -> bool {
        CircuitController::report(self, err).await
    }
}
