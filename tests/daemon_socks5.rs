//! End-to-end: SOCKS5 client -> daemon -> relays -> destination

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wiremock::MockServer;

use common::*;
use hopwire_client::{save_tokens, HttpContractApi, TcpTransport};
use hopwire_core::RelayEntry;
use hopwire_daemon::Daemon;
use hopwire_store::{names, MemoryStore};

/// SOCKS5 greeting plus CONNECT to an IPv4 destination; returns the reply code
async fn socks_connect(proxy: SocketAddr, target: SocketAddr) -> (TcpStream, u8) {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    client.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);

    let SocketAddr::V4(target) = target else {
        panic!("IPv4 destination expected");
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    (client, reply[1])
}

async fn running_daemon(server: &MockServer, store: Arc<MemoryStore>) -> Daemon {
    let mut config = config(&server.uri(), 2);
    config.address.socks = Some("127.0.0.1:0".to_string());
    config.address.h2c = None;

    let daemon = Daemon::new(
        store,
        config,
        Arc::new(HttpContractApi::new(TIMEOUT).unwrap()),
        Arc::new(TcpTransport::new(TIMEOUT)),
    );
    daemon.start().await.unwrap();
    daemon
}

#[tokio::test]
async fn test_socks5_through_two_hops() {
    let relays = vec![spawn_relay().await, spawn_relay().await];
    let entries: Vec<RelayEntry> = relays.iter().map(|r| r.entry.clone()).collect();
    let server = MockServer::start().await;
    mount_directory(&server, &entries).await;
    mount_activation(&server).await;
    let echo = spawn_echo().await;

    let store = Arc::new(MemoryStore::new());
    save_tokens(&*store, &[proof_token("a")]).unwrap();
    let daemon = running_daemon(&server, store.clone()).await;
    assert!(store.contains(names::PID));

    let proxy = daemon.socks_addr().unwrap();
    let (mut client, code) = socks_connect(proxy, echo).await;
    assert_eq!(code, 0x00);

    client.write_all(b"over socks").await.unwrap();
    let mut buf = [0u8; 10];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"over socks");

    assert!(relays.iter().all(|r| r.requests().len() == 1));
    assert!(daemon.shutdown().await);
    assert!(!store.contains(names::PID));
}

#[tokio::test]
async fn test_socks5_reports_unreachable_destination() {
    let relays = vec![spawn_relay().await, spawn_relay().await];
    let entries: Vec<RelayEntry> = relays.iter().map(|r| r.entry.clone()).collect();
    let server = MockServer::start().await;
    mount_directory(&server, &entries).await;
    mount_activation(&server).await;
    let closed: SocketAddr = dead_relay()
        .await
        .address
        .trim_start_matches("tcp://")
        .parse()
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    save_tokens(&*store, &[proof_token("a")]).unwrap();
    let daemon = running_daemon(&server, store).await;

    let (_client, code) = socks_connect(daemon.socks_addr().unwrap(), closed).await;
    assert_eq!(code, 0x04);
    daemon.shutdown().await;
}
