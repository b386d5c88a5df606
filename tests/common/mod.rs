//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet};
use coapreg_core::types::{DiscoveryResponse, Method, ResponseCode};
use coapreg_registration::{
    BackendDescriptor, BackendRegistry, NoReverseLookup, RegistrationService,
    ResourceDirectorySink, ServiceOptions, TaskSettings,
};
use coapreg_transport::{CoapEndpoint, EndpointConfig};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const LINKS: &str = r#"</sensors/temp>;rt="temperature-c",</led>"#;

/// Sink recording every forwarded directory.
#[derive(Default)]
pub struct RecordingSink {
    pub received: Mutex<Vec<(IpAddr, DiscoveryResponse)>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl ResourceDirectorySink for RecordingSink {
    async fn process_resource_directory(&self, response: DiscoveryResponse, node: IpAddr) {
        self.received.lock().push((node, response));
    }
}

/// A running proxy on loopback.
pub struct Proxy {
    pub addr: SocketAddr,
    pub service: RegistrationService,
    pub sink: Arc<RecordingSink>,
    shutdown: CancellationToken,
    receiver: JoinHandle<()>,
}

impl Proxy {
    /// Starts a proxy with one backend owning `prefix`. Discovery requests
    /// go to `discovery_port`, the port of the simulated device.
    pub async fn start(
        prefix: &str,
        discovery_port: u16,
        timeout: Duration,
        forget_failed_nodes: bool,
    ) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let registry = Arc::new(BackendRegistry::new());
        registry.register(Arc::new(BackendDescriptor::new(prefix, "/test", sink.clone())));

        let endpoint = CoapEndpoint::bind(&EndpointConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            recv_buffer_size: 64 * 1024,
        })
        .await
        .expect("Failed to bind endpoint");

        let options = ServiceOptions {
            workers: 4,
            task: TaskSettings {
                discovery_port,
                discovery_timeout: Some(timeout),
                forget_failed_nodes,
            },
            ..ServiceOptions::default()
        };
        let service = RegistrationService::new(
            options,
            registry,
            endpoint.discovery_client(),
            Arc::new(NoReverseLookup),
        )
        .expect("Failed to create service");
        service.start().expect("Failed to start service");

        let shutdown = CancellationToken::new();
        let receiver = endpoint.spawn(service.listener(), shutdown.clone());

        Self {
            addr: endpoint.local_addr(),
            service,
            sink,
            shutdown,
            receiver,
        }
    }

    pub fn backend(&self) -> Arc<BackendDescriptor> {
        Arc::clone(&self.service.registry().backends()[0])
    }

    /// Polls until `done` holds or two seconds pass.
    pub async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        for _ in 0..200 {
            if done(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached, stats: {:?}", self.service.stats());
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.receiver.await.expect("Receive loop panicked");
        self.service.stop().await;
    }
}

/// A simulated constrained device.
pub struct Device {
    pub socket: UdpSocket,
}

impl Device {
    pub async fn bind() -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.expect("Failed to bind device"),
        }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    pub async fn send(&self, packet: &Packet, to: SocketAddr) {
        let bytes = packet.to_bytes().expect("Failed to encode packet");
        self.socket.send_to(&bytes, to).await.expect("Failed to send");
    }

    /// Next packet, or `None` if nothing arrives within `wait`.
    pub async fn recv(&self, wait: Duration) -> Option<(Packet, SocketAddr)> {
        let mut buf = vec![0u8; 1500];
        match tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((size, from))) => {
                let packet = Packet::from_bytes(&buf[..size]).expect("Invalid packet");
                Some((packet, from))
            }
            _ => None,
        }
    }

    /// Receives until both the announcement ACK and the discovery request
    /// arrived; their order depends on scheduling.
    pub async fn recv_ack_and_discovery(&self) -> (Packet, Packet) {
        let mut ack = None;
        let mut discovery = None;
        while ack.is_none() || discovery.is_none() {
            let (packet, _) = self.recv(Duration::from_secs(2)).await.expect("Expected a packet");
            if packet.header.get_type() == MessageType::Acknowledgement {
                ack = Some(packet);
            } else {
                discovery = Some(packet);
            }
        }
        (ack.unwrap(), discovery.unwrap())
    }
}

pub fn announcement(kind: MessageType, message_id: u16) -> Packet {
    request(kind, Method::Post, "here_i_am", message_id)
}

pub fn request(kind: MessageType, method: Method, path: &str, message_id: u16) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(kind);
    packet.header.code = MessageClass::from(method.code());
    packet.header.message_id = message_id;
    packet.set_token(vec![0x42]);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet
}

/// Piggybacked link-format answer to a discovery request.
pub fn directory_reply(discovery: &Packet) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(MessageType::Acknowledgement);
    packet.header.code = MessageClass::from(ResponseCode::CONTENT.raw());
    packet.header.message_id = discovery.header.message_id;
    packet.set_token(discovery.get_token().to_vec());
    packet.add_option(CoapOption::ContentFormat, vec![40]);
    packet.payload = LINKS.as_bytes().to_vec();
    packet
}

pub fn uri_path(packet: &Packet) -> String {
    let segments: Vec<String> = packet
        .get_option(CoapOption::UriPath)
        .map(|values| values.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect())
        .unwrap_or_default();
    format!("/{}", segments.join("/"))
}

pub fn code(packet: &Packet) -> ResponseCode {
    ResponseCode::from_raw(u8::from(packet.header.code))
}
