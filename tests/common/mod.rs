//! Shared fixtures: in-process relays, an echo destination and a mocked
//! contract service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hopwire_client::{
    read_frame, save_tokens, shared_config, write_frame, CircuitController, CircuitDialer,
    CredentialManager, HttpContractApi, RelaySelector, SharedConfig, TcpTransport,
};
use hopwire_core::{
    unix_now, CircuitBuildError, ConnectRequest, ProofToken, PublicKey, RelayEntry, RelayRole,
    StatusReply, TARGET_SCHEME,
};
use hopwire_crypto::{verify_hop_token, SigningKeypair};
use hopwire_settings::Config;
use hopwire_store::{MemoryStore, Store};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Identity the mocked contract serves
pub const CONTRACT_KEY: PublicKey = PublicKey([1; 32]);

/// Relay running on a local listener, recording every request it reads
pub struct Relay {
    pub entry: RelayEntry,
    pub requests: Arc<Mutex<Vec<ConnectRequest>>>,
}

impl Relay {
    pub fn key(&self) -> PublicKey {
        self.entry.public_key
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }
}

pub async fn spawn_relay() -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let identity = SigningKeypair::generate().public_key();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let log = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                let _ = serve_request(socket, identity, log).await;
            });
        }
    });

    Relay {
        entry: RelayEntry {
            address: format!("tcp://{}", addr),
            public_key: identity,
            role: RelayRole::Fronting,
        },
        requests,
    }
}

/// Entry for a relay whose port accepts nothing
pub async fn dead_relay() -> RelayEntry {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    RelayEntry {
        address: format!("tcp://{}", addr),
        public_key: SigningKeypair::generate().public_key(),
        role: RelayRole::Entropic,
    }
}

async fn send_reply(socket: &mut TcpStream, reply: &StatusReply) -> io::Result<()> {
    let payload = serde_json::to_vec(reply).map_err(io::Error::other)?;
    write_frame(socket, &payload).await
}

/// One connection: read a connect request, then extend to the next relay or
/// reach the destination
async fn serve_request(
    mut socket: TcpStream,
    identity: PublicKey,
    log: Arc<Mutex<Vec<ConnectRequest>>>,
) -> io::Result<()> {
    let frame = read_frame(&mut socket).await?;
    let request: ConnectRequest = serde_json::from_slice(&frame).map_err(io::Error::other)?;
    log.lock().push(request.clone());

    if let Err(e) = verify_hop_token(&request.token, &identity, unix_now()) {
        let reply = StatusReply::error(401, e.to_string(), Some(identity));
        return send_reply(&mut socket, &reply).await;
    }

    if request.is_target() {
        let target = request
            .remote
            .trim_start_matches(TARGET_SCHEME)
            .trim_start_matches("://")
            .to_string();
        let upstream = match TcpStream::connect(&target).await {
            Ok(upstream) => upstream,
            Err(e) => {
                let reply = StatusReply::error(404, format!("{}: {}", target, e), None);
                return send_reply(&mut socket, &reply).await;
            }
        };
        send_reply(&mut socket, &StatusReply::ok()).await?;
        return pipe_framed(socket, upstream).await;
    }

    let next = request.remote.trim_start_matches("tcp://");
    match TcpStream::connect(next).await {
        Ok(mut upstream) => {
            send_reply(&mut socket, &StatusReply::ok()).await?;
            tokio::io::copy_bidirectional(&mut socket, &mut upstream).await?;
            Ok(())
        }
        Err(e) => {
            let reply = StatusReply::error(503, format!("{}: {}", next, e), Some(identity));
            send_reply(&mut socket, &reply).await
        }
    }
}

/// Client bytes go upstream as they are; destination bytes come back framed
async fn pipe_framed(client: TcpStream, upstream: TcpStream) -> io::Result<()> {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let outbound = tokio::spawn(async move {
        let _ = tokio::io::copy(&mut client_read, &mut upstream_write).await;
        let _ = upstream_write.shutdown().await;
    });

    let mut buf = vec![0u8; 4096];
    loop {
        let n = upstream_read.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        write_frame(&mut client_write, &buf[..n]).await?;
    }
    client_write.shutdown().await?;
    let _ = outbound.await;
    Ok(())
}

/// Destination that echoes everything back
pub async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

pub fn proof_token(nonce: &str) -> ProofToken {
    ProofToken {
        issuer: PublicKey([9; 32]),
        nonce: nonce.to_string(),
        expiration: unix_now() + 3600,
        signature: "sig".to_string(),
    }
}

pub fn bundle(contract: &str, tokens: &[ProofToken]) -> serde_json::Value {
    json!({
        "contract": { "endpoint": contract, "public_key": CONTRACT_KEY },
        "proof_tokens": tokens,
    })
}

/// Contract info, directory info and the relay list
pub async fn mount_directory(server: &MockServer, relays: &[RelayEntry]) {
    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "endpoint": server.uri(),
            "public_key": CONTRACT_KEY,
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/directory/info"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "endpoint": "http://directory.example:3002" })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/relays"))
        .respond_with(ResponseTemplate::new(200).set_body_json(relays))
        .mount(server)
        .await;
}

pub fn grant(server: &MockServer) -> serde_json::Value {
    json!({
        "contract": { "endpoint": server.uri(), "public_key": CONTRACT_KEY },
        "expiration": unix_now() + 3600,
    })
}

/// Activation endpoint that grants every request
pub async fn mount_activation(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/servicekey/activate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant(server)))
        .mount(server)
        .await;
}

pub fn config(contract: &str, hops: usize) -> Config {
    let mut config = Config::default();
    config.contract = Some(contract.to_string());
    config.circuit.hops = hops;
    config
}

/// Fixed sequence of paths, by relay identity
pub struct ScriptedSelector {
    paths: Mutex<VecDeque<Vec<PublicKey>>>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedSelector {
    pub fn new(paths: Vec<Vec<PublicKey>>) -> Self {
        Self {
            paths: Mutex::new(paths.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl RelaySelector for ScriptedSelector {
    fn select(
        &self,
        hops: usize,
        pool: &[RelayEntry],
    ) -> Result<Vec<RelayEntry>, CircuitBuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let insufficient = CircuitBuildError::InsufficientRelays {
            need: hops,
            available: pool.len(),
        };
        let path = self.paths.lock().pop_front().ok_or(insufficient.clone())?;
        path.iter()
            .map(|key| {
                pool.iter()
                    .find(|r| &r.public_key == key)
                    .cloned()
                    .ok_or(insufficient.clone())
            })
            .collect()
    }
}

/// Client stack against the mocked contract, with proof tokens in store
pub struct Stack {
    pub store: Arc<MemoryStore>,
    pub config: SharedConfig,
    pub credentials: Arc<CredentialManager>,
    pub circuits: Arc<CircuitController>,
    pub dialer: CircuitDialer,
}

pub fn stack(config: Config, selector: Option<Box<dyn RelaySelector>>) -> Stack {
    let store = Arc::new(MemoryStore::new());
    save_tokens(&*store, &[proof_token("t1"), proof_token("t2")]).unwrap();
    let config = shared_config(config);
    let api = Arc::new(HttpContractApi::new(TIMEOUT).unwrap());

    let credentials = Arc::new(CredentialManager::new(
        api.clone(),
        store.clone() as Arc<dyn Store>,
        config.clone(),
    ));
    let circuits = Arc::new(match selector {
        Some(selector) => CircuitController::with_selector(
            api,
            store.clone() as Arc<dyn Store>,
            config.clone(),
            selector,
        ),
        None => CircuitController::new(api, store.clone() as Arc<dyn Store>, config.clone()),
    });
    let dialer = CircuitDialer::new(
        credentials.clone(),
        circuits.clone(),
        Arc::new(TcpTransport::new(TIMEOUT)),
    );

    Stack {
        store,
        config,
        credentials,
        circuits,
        dialer,
    }
}
