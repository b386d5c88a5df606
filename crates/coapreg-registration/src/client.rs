//! Outbound discovery requests.

use crate::bridge::ResponseBridge;
use crate::error::{RegistrationError, Result};
use async_trait::async_trait;
use coapreg_core::types::DiscoveryResponse;
use http::Uri;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Path of the CoRE resource directory listing (RFC 6690).
pub const WELL_KNOWN_CORE: &str = "/.well-known/core";

/// Default CoAP port.
pub const DEFAULT_COAP_PORT: u16 = 5683;

/// Sends `GET /.well-known/core` to a device.
///
/// The call returns once the request is on its way. The response, or a
/// delivery failure detected later, is reported through `bridge`. Errors
/// returned directly mean the request was never sent.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn send_discovery(
        &self,
        target: &DiscoveryTarget,
        bridge: Arc<ResponseBridge<DiscoveryResponse>>,
    ) -> Result<()>;
}

/// Where a discovery request goes: `coap://<host>:<port>/.well-known/core`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryTarget {
    addr: IpAddr,
    port: u16,
    uri: Uri,
}

impl DiscoveryTarget {
    pub fn new(addr: IpAddr, port: u16) -> Result<Self> {
        Self::from_literal(&addr.to_string(), port)
    }

    /// Builds a target from a textual address, which may carry a `%zone`
    /// suffix or brackets.
    pub fn from_literal(literal: &str, port: u16) -> Result<Self> {
        let host = format_host(literal)?;
        let addr: IpAddr = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|e: std::net::AddrParseError| malformed(literal, e.to_string()))?;

        let uri: Uri = format!("coap://{host}:{port}{WELL_KNOWN_CORE}")
            .parse()
            .map_err(|e: http::uri::InvalidUri| malformed(literal, e.to_string()))?;

        Ok(Self { addr, port, uri })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Uri-Path segments of the request (`.well-known`, `core`).
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.uri.path().split('/').filter(|segment| !segment.is_empty())
    }
}

impl fmt::Display for DiscoveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Formats an address literal as a URI host: zone index stripped, IPv6 in
/// brackets.
pub fn format_host(literal: &str) -> Result<String> {
    let unbracketed = literal.trim().trim_start_matches('[').trim_end_matches(']');
    let bare = match unbracketed.find('%') {
        Some(zone) => &unbracketed[..zone],
        None => unbracketed,
    };

    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => Ok(format!("[{v6}]")),
        Ok(IpAddr::V4(v4)) => Ok(v4.to_string()),
        Err(e) => Err(malformed(literal, e.to_string())),
    }
}

fn malformed(target: &str, reason: String) -> RegistrationError {
    RegistrationError::MalformedTarget {
        target: target.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv6_target_is_bracketed() {
        let addr = "2001:db8::1".parse().unwrap();
        let target = DiscoveryTarget::new(addr, DEFAULT_COAP_PORT).unwrap();
        assert_eq!(
            target.uri().to_string(),
            "coap://[2001:db8::1]:5683/.well-known/core"
        );
        assert_eq!(target.socket_addr().to_string(), "[2001:db8::1]:5683");
    }

    #[test]
    fn test_ipv4_target() {
        let target = DiscoveryTarget::new("192.0.2.7".parse().unwrap(), 5684).unwrap();
        assert_eq!(target.to_string(), "coap://192.0.2.7:5684/.well-known/core");
        assert_eq!(
            target.path_segments().collect::<Vec<_>>(),
            vec![".well-known", "core"]
        );
    }

    #[test]
    fn test_zone_index_is_stripped() {
        assert_eq!(format_host("fe80::1%eth0").unwrap(), "[fe80::1]");
        assert_eq!(format_host("[fe80::1%3]").unwrap(), "[fe80::1]");

        let target = DiscoveryTarget::from_literal("fe80::abcd%wlan0", 5683).unwrap();
        assert_eq!(
            target.uri().to_string(),
            "coap://[fe80::abcd]:5683/.well-known/core"
        );
    }

    #[test]
    fn test_malformed_literal() {
        let err = DiscoveryTarget::from_literal("not-an-address", 5683).unwrap_err();
        assert_eq!(err.kind(), "malformed_target");
    }
}
