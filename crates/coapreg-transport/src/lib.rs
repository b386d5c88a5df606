//! UDP transport for the registration proxy.
//!
//! Message encoding is delegated to `coap-lite`; this crate only maps
//! packets to the transport-neutral types of `coapreg-core` and moves them
//! over a single UDP socket:
//!
//! - inbound requests go to the `RegistrationListener`, and its reply is
//!   sent back (piggybacked on an ACK for confirmable requests)
//! - `GET /.well-known/core` requests are sent by `CoapDiscoveryClient`,
//!   whose responses are matched back to the waiting task by token
//!
//! Retransmission and block-wise transfer are not implemented; an
//! unanswered discovery ends at the registration timeout.

pub mod client;
pub mod codec;
pub mod endpoint;

pub use client::CoapDiscoveryClient;
pub use endpoint::{CoapEndpoint, EndpointConfig};
