//! SOCKS5 proxy server (RFC 1928, CONNECT only, NO AUTH)
//!
//! Performs the SOCKS5 handshake for each local connection, dials the
//! requested destination through the circuit, then pipes bytes both ways.

use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use hopwire_client::{CircuitDialer, DialError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const SOCKS_VERSION: u8 = 0x05;

/// Reply codes
const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// SOCKS5 proxy server
pub struct Socks5Server {
    listen_addr: SocketAddr,
    dialer: Arc<CircuitDialer>,
    /// Handle for the listener task
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Socks5Server {
    pub fn new(listen_addr: SocketAddr, dialer: Arc<CircuitDialer>) -> Self {
        Self {
            listen_addr,
            dialer,
            handle: None,
        }
    }

    /// Start listening for SOCKS5 connections.
    ///
    /// Returns immediately; the server runs in a background task.
    pub async fn start(&mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        let actual_addr = listener.local_addr()?;
        info!("SOCKS5 proxy listening on {}", actual_addr);
        self.listen_addr = actual_addr;

        let dialer = self.dialer.clone();

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!("SOCKS5 connection from {}", peer_addr);
                        let dialer = dialer.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_socks5_connection(stream, &dialer).await {
                                debug!("SOCKS5 connection from {} ended: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("SOCKS5 accept error: {}", e);
                    }
                }
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the SOCKS5 server
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("SOCKS5 proxy stopped");
        }
    }

    /// Get the listening address
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

impl Drop for Socks5Server {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn reply(stream: &mut TcpStream, code: u8) -> std::io::Result<()> {
    // VER | REP | RSV | ATYP | BND.ADDR (0.0.0.0) | BND.PORT (0)
    stream
        .write_all(&[SOCKS_VERSION, code, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
}

/// Handle a single SOCKS5 connection
async fn handle_socks5_connection(
    mut stream: TcpStream,
    dialer: &CircuitDialer,
) -> Result<(), BoxError> {
    // Greeting: VER | NMETHODS | METHODS
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS_VERSION {
        return Err(format!("Unsupported SOCKS version: {}", header[0]).into());
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&0x00) {
        stream.write_all(&[SOCKS_VERSION, 0xFF]).await?;
        return Err("Client does not support NO AUTH".into());
    }
    stream.write_all(&[SOCKS_VERSION, 0x00]).await?;

    // Request: VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT
    let mut request_header = [0u8; 4];
    stream.read_exact(&mut request_header).await?;

    if request_header[0] != SOCKS_VERSION {
        return Err("Invalid SOCKS5 request version".into());
    }

    if request_header[1] != 0x01 {
        reply(&mut stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(format!("Unsupported SOCKS5 command: {}", request_header[1]).into());
    }

    let host = match request_header[3] {
        0x01 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            format!("{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
        }
        0x03 => {
            let len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            String::from_utf8(domain)?
        }
        0x04 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            format!("[{}]", Ipv6Addr::from(addr))
        }
        _ => {
            reply(&mut stream, REPLY_ADDRESS_NOT_SUPPORTED).await?;
            return Err(format!("Unsupported address type: {}", request_header[3]).into());
        }
    };
    let port = stream.read_u16().await?;
    let target = format!("{}:{}", host, port);

    debug!("SOCKS5 CONNECT to {}", target);

    let mut tunnel = match dialer.dial("tcp", &target).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            let code = match e {
                DialError::Transport(_) => REPLY_HOST_UNREACHABLE,
                _ => REPLY_GENERAL_FAILURE,
            };
            warn!("Circuit dial to {} failed: {}", target, e);
            reply(&mut stream, code).await?;
            return Err(e.into());
        }
    };
    reply(&mut stream, REPLY_SUCCEEDED).await?;

    let (sent, received) = tokio::io::copy_bidirectional(&mut stream, &mut tunnel).await?;
    debug!(
        "SOCKS5 session to {} closed ({} bytes out, {} bytes in)",
        target, sent, received
    );
    Ok(())
}
