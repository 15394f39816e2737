//! Raw transport: dialing relays and exchanging connect messages

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use hopwire_core::{ConnectRequest, StatusReply, TransportError};

use crate::frame::{read_frame, write_frame};

/// Byte stream a tunnel is built on
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a raw connection to `address`
    async fn dial(&self, protocol: &str, address: &str) -> Result<BoxedStream, TransportError>;

    /// Write a connect request onto the tunnel built so far and read the
    /// reply. A rejection is returned as a non-success reply, not an error.
    async fn send_connect(
        &self,
        stream: &mut BoxedStream,
        request: &ConnectRequest,
    ) -> Result<StatusReply, TransportError>;
}

/// `tcp://host:port` or plain `host:port` to `host:port`
fn socket_address(address: &str) -> Result<&str, TransportError> {
    let rest = match address.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(TransportError::InvalidAddress(format!(
                "unsupported scheme {} in {}",
                scheme, address
            )))
        }
        None => address,
    };
    if rest.is_empty() || !rest.contains(':') {
        return Err(TransportError::InvalidAddress(address.to_string()));
    }
    Ok(rest)
}

/// TCP transport with length-prefixed JSON control frames
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, protocol: &str, address: &str) -> Result<BoxedStream, TransportError> {
        if protocol != "tcp" {
            return Err(TransportError::InvalidAddress(format!(
                "cannot dial {} over {}",
                address, protocol
            )));
        }
        let target = socket_address(address)?;
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(target))
            .await
            .map_err(|_| TransportError::Timeout(address.to_string()))?
            .map_err(|e| TransportError::Dial {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        debug!("Dialed {}", address);
        Ok(Box::new(stream))
    }

    async fn send_connect(
        &self,
        stream: &mut BoxedStream,
        request: &ConnectRequest,
    ) -> Result<StatusReply, TransportError> {
        let payload =
            serde_json::to_vec(request).map_err(|e| TransportError::Protocol(e.to_string()))?;
        let exchange = async {
            write_frame(&mut *stream, &payload).await?;
            read_frame(&mut *stream).await
        };
        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(request.remote.clone()))??;
        serde_json::from_slice(&reply)
            .map_err(|e| TransportError::Protocol(format!("invalid status reply: {}", e)))
    }
}
