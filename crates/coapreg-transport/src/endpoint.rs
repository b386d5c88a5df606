//! The UDP endpoint: one socket serving announcements and carrying the
//! discovery exchanges.

use crate::client::CoapDiscoveryClient;
use crate::codec::{self, Incoming};
use anyhow::{Context, Result};
use coap_lite::Packet;
use coapreg_core::config::ServerConfig;
use coapreg_core::types::MessageKind;
use coapreg_registration::RegistrationListener;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM_SIZE: usize = 65_535;

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub bind_addr: SocketAddr,
    /// Kernel receive buffer (SO_RCVBUF), applied best-effort.
    pub recv_buffer_size: usize,
}

impl EndpointConfig {
    pub fn from_server_config(config: &ServerConfig) -> coapreg_core::Result<Self> {
        Ok(Self {
            bind_addr: config.bind_addr()?,
            recv_buffer_size: config.recv_buffer_size,
        })
    }
}

pub struct CoapEndpoint {
    socket: Arc<UdpSocket>,
    client: Arc<CoapDiscoveryClient>,
    local_addr: SocketAddr,
}

impl CoapEndpoint {
    /// Binds the socket. An IPv6 wildcard address also accepts IPv4 peers.
    pub async fn bind(config: &EndpointConfig) -> Result<Self> {
        let bind_addr = config.bind_addr;
        info!("Binding CoAP endpoint to {}", bind_addr);

        let socket2 = socket2::Socket::new(
            if bind_addr.is_ipv4() {
                socket2::Domain::IPV4
            } else {
                socket2::Domain::IPV6
            },
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .context("Failed to create UDP socket")?;

        if bind_addr.is_ipv6() {
            if let Err(e) = socket2.set_only_v6(false) {
                warn!(
                    error = %e,
                    "Could not enable dual-stack socket, IPv4 peers will not be served"
                );
            }
        }

        // best-effort
        let _ = socket2.set_recv_buffer_size(config.recv_buffer_size);

        socket2.set_nonblocking(true)?;
        socket2
            .bind(&bind_addr.into())
            .with_context(|| format!("Failed to bind {bind_addr}"))?;

        let socket = UdpSocket::from_std(socket2.into())?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let client = Arc::new(CoapDiscoveryClient::new(Arc::clone(&socket)));

        info!("CoAP endpoint listening on {}", local_addr);
        Ok(Self {
            socket,
            client,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Client sending discovery requests from this endpoint's socket.
    pub fn discovery_client(&self) -> Arc<CoapDiscoveryClient> {
        Arc::clone(&self.client)
    }

    /// Spawns the receive loop; it runs until `shutdown` is cancelled.
    pub fn spawn(
        &self,
        listener: RegistrationListener,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let client = Arc::clone(&self.client);
        tokio::spawn(receive_loop(socket, client, listener, shutdown))
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    client: Arc<CoapDiscoveryClient>,
    listener: RegistrationListener,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("CoAP receive loop shutting down");
                break;
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok((size, source)) => {
                    handle_datagram(&socket, &client, &listener, &buf[..size], source).await;
                }
                Err(e) => {
                    // ICMP errors from earlier sends surface here on some platforms
                    warn!(error = %e, "UDP receive error");
                }
            },
        }
    }
}

async fn handle_datagram(
    socket: &UdpSocket,
    client: &CoapDiscoveryClient,
    listener: &RegistrationListener,
    data: &[u8],
    source: SocketAddr,
) {
    let incoming = match codec::decode(data, source) {
        Ok(incoming) => incoming,
        Err(e) => {
            debug!(source = %source, error = %e, "Ignoring undecodable datagram");
            return;
        }
    };

    match incoming {
        Incoming::Request { packet, request } => {
            if let Some(reply) = listener.handle(&request) {
                let reply = codec::encode_reply(&packet, &reply, client.next_message_id());
                send(socket, &reply, source).await;
            }
        }
        Incoming::Response {
            message_id,
            kind,
            token,
            response,
        } => {
            let delivered = client.deliver(&token, source.ip(), response);
            if !delivered {
                debug!(source = %source, message_id, "Response for unknown exchange");
            }
            if kind == MessageKind::Confirmable {
                let answer = if delivered {
                    codec::empty_ack(message_id)
                } else {
                    codec::reset(message_id)
                };
                send(socket, &answer, source).await;
            }
        }
        Incoming::Empty { message_id, kind } => match kind {
            MessageKind::Reset => {
                if !client.reset(message_id, source.ip()) {
                    trace!(source = %source, message_id, "Reset for unknown exchange");
                }
            }
            MessageKind::Confirmable => {
                trace!(source = %source, "CoAP ping");
                send(socket, &codec::reset(message_id), source).await;
            }
            // empty ACK: separate response follows
            MessageKind::Acknowledgement | MessageKind::NonConfirmable => {
                trace!(source = %source, message_id, ?kind, "Empty message");
            }
        },
    }
}

async fn send(socket: &UdpSocket, packet: &Packet, dest: SocketAddr) {
    let bytes = match codec::encode(packet) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(dest = %dest, error = %e, "Failed to encode reply");
            return;
        }
    };

    if let Err(e) = socket.send_to(&bytes, dest).await {
        warn!(dest = %dest, error = %e, "Failed to send reply");
    }
}
