//! Discovery requests over the shared UDP socket.
//!
//! Each request gets a fresh 8-byte token; responses arriving on the
//! endpoint's receive loop are matched back to the waiting bridge by token
//! and peer address.

use crate::codec;
use async_trait::async_trait;
use coapreg_core::types::DiscoveryResponse;
use coapreg_registration::{DiscoveryClient, DiscoveryTarget, RegistrationError, ResponseBridge};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tracing::{debug, warn};
use uuid::Uuid;

const TOKEN_LEN: usize = 8;

struct PendingExchange {
    message_id: u16,
    target: DiscoveryTarget,
    /// Weak so a task that timed out and dropped its bridge does not keep
    /// it alive here.
    bridge: Weak<ResponseBridge<DiscoveryResponse>>,
}

impl PendingExchange {
    fn is_from(&self, source: IpAddr) -> bool {
        self.target.addr() == source.to_canonical()
    }
}

pub struct CoapDiscoveryClient {
    socket: Arc<UdpSocket>,
    /// IPv4 targets are addressed as `::ffff:a.b.c.d` on an IPv6 socket.
    ipv6_socket: bool,
    pending: DashMap<Vec<u8>, PendingExchange>,
    next_message_id: AtomicU16,
}

impl CoapDiscoveryClient {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        let ipv6_socket = socket.local_addr().is_ok_and(|addr| addr.is_ipv6());
        // random starting point, as recommended for message ids
        let seed = Uuid::new_v4().as_u128() as u16;
        Self {
            socket,
            ipv6_socket,
            pending: DashMap::new(),
            next_message_id: AtomicU16::new(seed),
        }
    }

    pub fn next_message_id(&self) -> u16 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Exchanges still waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Completes the exchange that owns `token`, provided the response came
    /// from the node it was sent to. Returns false when no such exchange
    /// exists or its task is gone.
    pub fn deliver(&self, token: &[u8], source: IpAddr, response: DiscoveryResponse) -> bool {
        let Some((_, exchange)) = self
            .pending
            .remove_if(token, |_, exchange| exchange.is_from(source))
        else {
            return false;
        };

        match exchange.bridge.upgrade() {
            Some(bridge) => {
                debug!(
                    target = %exchange.target,
                    code = %response.code,
                    "Discovery response received"
                );
                bridge.complete(response)
            }
            None => {
                debug!(
                    target = %exchange.target,
                    "Discovery response arrived after the task gave up"
                );
                false
            }
        }
    }

    /// Fails the exchange whose request `source` rejected with a reset.
    pub fn reset(&self, message_id: u16, source: IpAddr) -> bool {
        let token = self
            .pending
            .iter()
            .find(|entry| entry.value().message_id == message_id && entry.value().is_from(source))
            .map(|entry| entry.key().clone());

        let Some((_, exchange)) = token.and_then(|token| self.pending.remove(&token)) else {
            return false;
        };

        warn!(target = %exchange.target, message_id, "Discovery request reset by peer");
        exchange.bridge.upgrade().is_some_and(|bridge| {
            bridge.fail(RegistrationError::Delivery {
                target: exchange.target.to_string(),
                reason: "reset by peer".to_string(),
            })
        })
    }

    fn prune(&self) {
        self.pending
            .retain(|_, exchange| exchange.bridge.strong_count() > 0);
    }
}

/// Socket address to send to, given the family of the local socket.
fn destination(ipv6_socket: bool, target: &DiscoveryTarget) -> SocketAddr {
    match target.addr() {
        IpAddr::V4(v4) if ipv6_socket => {
            SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), target.port())
        }
        _ => target.socket_addr(),
    }
}

#[async_trait]
impl DiscoveryClient for CoapDiscoveryClient {
    async fn send_discovery(
        &self,
        target: &DiscoveryTarget,
        bridge: Arc<ResponseBridge<DiscoveryResponse>>,
    ) -> coapreg_registration::Result<()> {
        self.prune();

        let token = Uuid::new_v4().as_bytes()[..TOKEN_LEN].to_vec();
        let message_id = self.next_message_id();
        let packet = codec::discovery_request(target, message_id, token.clone());
        let bytes = codec::encode(&packet)
            .map_err(|e| RegistrationError::RequestConstruction(e.to_string()))?;

        self.pending.insert(
            token.clone(),
            PendingExchange {
                message_id,
                target: target.clone(),
                bridge: Arc::downgrade(&bridge),
            },
        );

        let dest = destination(self.ipv6_socket, target);
        debug!(target = %target, message_id, "Sending discovery request");
        if let Err(e) = self.socket.send_to(&bytes, dest).await {
            self.pending.remove(&token);
            let error = RegistrationError::Delivery {
                target: target.to_string(),
                reason: e.to_string(),
            };
            bridge.fail(error.clone());
            return Err(error);
        }

        Ok(())
    }
}
