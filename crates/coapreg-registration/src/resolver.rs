//! Hostname lookup for hostname-keyed backends.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

/// Maps a node address to its hostname.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// Returns the hostname of `addr`, or `None` if it has none.
    async fn hostname(&self, addr: IpAddr) -> Option<String>;
}

/// Reverse DNS through the system resolver (`getnameinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseDnsResolver;

#[async_trait]
impl HostnameResolver for ReverseDnsResolver {
    async fn hostname(&self, addr: IpAddr) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr)).await;

        match lookup {
            Ok(Ok(name)) => Some(name),
            Ok(Err(e)) => {
                debug!(address = %addr, error = %e, "Reverse lookup failed");
                None
            }
            Err(e) => {
                debug!(address = %addr, error = %e, "Reverse lookup task failed");
                None
            }
        }
    }
}

/// Never resolves; only address prefixes can match.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReverseLookup;

#[async_trait]
impl HostnameResolver for NoReverseLookup {
    async fn hostname(&self, _addr: IpAddr) -> Option<String> {
        None
    }
}

/// Fixed address to hostname table.
#[derive(Debug, Clone, Default)]
pub struct StaticHostnames {
    names: HashMap<IpAddr, String>,
}

impl StaticHostnames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, addr: IpAddr, hostname: impl Into<String>) -> Self {
        self.names.insert(addr, hostname.into());
        self
    }
}

#[async_trait]
impl HostnameResolver for StaticHostnames {
    async fn hostname(&self, addr: IpAddr) -> Option<String> {
        self.names.get(&addr).cloned()
    }
}
