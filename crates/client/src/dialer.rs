//! Hop-chaining dialer
//!
//! A tunnel is built incrementally. The first relay is dialed directly; every
//! further relay is reached by asking the current last relay to extend the
//! tunnel to it, and the last relay is finally asked to connect to the
//! destination. Each request carries a fresh hop token bound to the relay that
//! receives it, so relays only ever learn their immediate neighbours.
//!
//! For a circuit of `n` hops a dial costs one raw dial plus `n` connect
//! requests.

use std::sync::Arc;

use tracing::{debug, info};

use hopwire_core::{
    Circuit, CircuitError, ConnectRequest, Credential, CredentialError, PublicKey, RelayEntry,
    TransportError,
};
use hopwire_crypto::derive_hop_token;

use crate::circuit::CircuitSource;
use crate::credential::CredentialSource;
use crate::frame::FramedStream;
use crate::transport::{BoxedStream, Transport};
use crate::{DialError, Result};

/// Established tunnel to a destination
pub type TunnelStream = FramedStream<BoxedStream>;

pub struct CircuitDialer {
    credentials: Arc<dyn CredentialSource>,
    circuits: Arc<dyn CircuitSource>,
    transport: Arc<dyn Transport>,
    protocol_override: Option<String>,
}

impl CircuitDialer {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        circuits: Arc<dyn CircuitSource>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            credentials,
            circuits,
            transport,
            protocol_override: None,
        }
    }

    /// Force the destination protocol regardless of what callers ask for
    pub fn with_protocol_override(mut self, protocol: Option<String>) -> Self {
        self.protocol_override = protocol;
        self
    }

    /// Open a tunnel to `target` (`host:port`) speaking `protocol`.
    ///
    /// Failures are reported back to the circuit source before returning.
    pub async fn dial(&self, protocol: &str, target: &str) -> Result<TunnelStream> {
        let result = self.try_dial(protocol, target).await;
        if let Err(e) = &result {
            self.circuits.report(e).await;
        }
        result
    }

    async fn try_dial(&self, protocol: &str, target: &str) -> Result<TunnelStream> {
        let credential = self.credentials.credential().await?;
        let circuit = self.circuits.circuit().await?;
        let protocol = self.protocol_override.as_deref().unwrap_or(protocol);

        let mut stream = self.connect_first(&circuit).await?;

        for pair in circuit.hops().windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            let request = ConnectRequest::extend(&next.address, hop_token(&credential, current)?);
            self.extend(&mut stream, &request)
                .await
                .map_err(|reason| CircuitError::new(next.public_key, reason))?;
            debug!(
                "Connected to {} relay {} ({})",
                next.role, next.address, next.public_key
            );
        }

        let last = circuit.last();
        let request = ConnectRequest::target(protocol, target, hop_token(&credential, last)?);
        let reply = self.transport.send_connect(&mut stream, &request).await?;
        if !reply.is_success() {
            return Err(match reply.origin_key() {
                Some(origin) if reply.is_circuit_error() => {
                    CircuitError::new(origin, reply.desc).into()
                }
                _ => TransportError::Rejected {
                    code: reply.code,
                    description: reply.desc,
                }
                .into(),
            });
        }

        info!(
            "Tunnel to {} over {} through {} hops",
            target,
            protocol,
            circuit.len()
        );
        Ok(FramedStream::new(stream))
    }

    /// Dial the entry relay. A failure here is attributed to it.
    async fn connect_first(&self, circuit: &Circuit) -> Result<BoxedStream> {
        let first = circuit.first();
        let stream = self
            .transport
            .dial("tcp", &first.address)
            .await
            .map_err(|e| attributed(&first.public_key, e))?;
        debug!(
            "Connected to {} relay {} ({})",
            first.role, first.address, first.public_key
        );
        Ok(stream)
    }

    /// One extend step; any failure is described for attribution
    async fn extend(
        &self,
        stream: &mut BoxedStream,
        request: &ConnectRequest,
    ) -> std::result::Result<(), String> {
        let reply = self
            .transport
            .send_connect(stream, request)
            .await
            .map_err(|e| e.to_string())?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(format!("status {}: {}", reply.code, reply.desc))
        }
    }
}

fn attributed(origin: &PublicKey, e: TransportError) -> DialError {
    CircuitError::new(*origin, e.to_string()).into()
}

fn hop_token(
    credential: &Credential,
    relay: &RelayEntry,
) -> std::result::Result<hopwire_core::HopToken, CredentialError> {
    derive_hop_token(credential, &relay.public_key)
        .map_err(|e| CredentialError::NoCredentialAvailable(e.to_string()))
}
