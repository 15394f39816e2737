//! Daemon service: startup checks, reload and shutdown

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use hopwire_client::{
    shared_config, sync_contract, validate_tokens, CircuitController, CircuitDialer, ContractApi,
    CredentialManager, HttpContractApi, SharedConfig, TcpTransport, Transport,
};
use hopwire_core::ConfigError;
use hopwire_settings::Config;
use hopwire_store::{names, FsStore, Store};

use crate::socks5::Socks5Server;
use crate::tun::TunProcess;
use crate::{DaemonError, Result};

pub struct Daemon {
    store: Arc<dyn Store>,
    api: Arc<dyn ContractApi>,
    config: SharedConfig,
    credentials: Arc<CredentialManager>,
    circuits: Arc<CircuitController>,
    dialer: Arc<CircuitDialer>,
    socks: Mutex<Option<Socks5Server>>,
    tun: Mutex<Option<TunProcess>>,
    data_dir: Option<PathBuf>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Daemon {
    pub fn new(
        store: Arc<dyn Store>,
        config: Config,
        api: Arc<dyn ContractApi>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let config = shared_config(config);
        let credentials = Arc::new(CredentialManager::new(
            api.clone(),
            store.clone(),
            config.clone(),
        ));
        let circuits = Arc::new(CircuitController::new(
            api.clone(),
            store.clone(),
            config.clone(),
        ));
        let protocol_override = Config::target_protocol_override();
        if let Some(protocol) = &protocol_override {
            info!("Destination protocol forced to {}", protocol);
        }
        let dialer = Arc::new(
            CircuitDialer::new(credentials.clone(), circuits.clone(), transport)
                .with_protocol_override(protocol_override),
        );

        Self {
            store,
            api,
            config,
            credentials,
            circuits,
            dialer,
            socks: Mutex::new(None),
            tun: Mutex::new(None),
            data_dir: None,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Daemon backed by the data directory, the HTTP contract API and TCP
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        let store = FsStore::open(&data_dir)?;
        let config = Config::load(&store)?;
        let timeout = config.timeout();
        info!("Using data directory {}", data_dir.display());

        let mut daemon = Self::new(
            Arc::new(store),
            config,
            Arc::new(HttpContractApi::new(timeout)?),
            Arc::new(TcpTransport::new(timeout)),
        );
        daemon.data_dir = Some(data_dir);
        Ok(daemon)
    }

    /// Validate configuration, contract and proof tokens, then bring up
    /// the listeners. Any startup failure is fatal.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DaemonError::AlreadyRunning);
        }
        let config = self.config.read().clone();
        config.validate()?;

        let contract = config.contract.clone().unwrap_or_default();
        let snapshot = sync_contract(&*self.api, &*self.store, &contract).await?;
        info!(
            "Contract {} ({} relays known)",
            snapshot.info.endpoint,
            snapshot.relays.len()
        );
        let fresh = validate_tokens(&*self.api, &*self.store, &self.config).await?;
        info!("{} proof tokens ready", fresh);

        self.store
            .write(names::PID, std::process::id().to_string().as_bytes())?;

        if let Err(e) = self.circuits.circuit().await {
            warn!("Could not build initial circuit: {}", e);
        }

        let socks_addr = match &config.address.socks {
            Some(address) => Some(self.start_socks(address).await?),
            None => None,
        };
        if let Some(h2c) = &config.address.h2c {
            info!("H2C address {} is served by an external listener", h2c);
        }

        if let (Some(binary), Some(tun)) = (&config.tun.binary, &config.address.tun) {
            match socks_addr {
                Some(socks) => {
                    let helper = TunProcess::start(
                        binary,
                        tun,
                        &socks.to_string(),
                        self.data_dir.as_deref(),
                    )?;
                    *self.tun.lock() = Some(helper);
                }
                None => warn!("Tun helper needs address.socks, not starting it"),
            }
        }

        info!("Daemon started");
        Ok(())
    }

    async fn start_socks(&self, address: &str) -> Result<SocketAddr> {
        let listen_addr: SocketAddr =
            address.parse().map_err(|e| ConfigError::InvalidValue {
                key: "address.socks".to_string(),
                reason: format!("{}", e),
            })?;
        let mut server = Socks5Server::new(listen_addr, self.dialer.clone());
        server.start().await?;
        let bound = server.listen_addr();
        *self.socks.lock() = Some(server);
        Ok(bound)
    }

    /// Re-read configuration, refresh contract metadata and reset the
    /// circuit. On failure the running configuration is left untouched.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading configuration");
        let config = Config::load(&*self.store)?;
        config.validate()?;
        self.circuits.reload(config).await?;
        info!("Reload complete");
        Ok(())
    }

    /// Stop the tun helper, remove the pid marker and release listeners.
    ///
    /// Only the first call does anything; returns whether this call did.
    pub async fn shutdown(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already done");
            return false;
        }
        info!("Shutting down");

        let tun = self.tun.lock().take();
        if let Some(tun) = tun {
            tun.stop().await;
        }
        if let Err(e) = self.store.remove(names::PID) {
            warn!("Could not remove pid marker: {}", e);
        }
        if let Some(mut socks) = self.socks.lock().take() {
            socks.stop();
        }

        info!("Daemon stopped");
        true
    }

    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn circuits(&self) -> &Arc<CircuitController> {
        &self.circuits
    }

    pub fn dialer(&self) -> &Arc<CircuitDialer> {
        &self.dialer
    }

    /// Bound SOCKS5 address while running
    pub fn socks_addr(&self) -> Option<SocketAddr> {
        self.socks.lock().as_ref().map(Socks5Server::listen_addr)
    }

    pub fn tun_pid(&self) -> Option<u32> {
        self.tun.lock().as_ref().and_then(TunProcess::id)
    }
}
