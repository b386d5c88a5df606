//! Backend registry and per-backend node membership.
//!
//! Backends are matched in registration order and the first match wins, so
//! a broad prefix registered early shadows a more specific one registered
//! later. The list is copy-on-write: readers work on an immutable snapshot
//! while `register` swaps in a new one.

use crate::resolver::HostnameResolver;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coapreg_core::types::DiscoveryResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Receives the resource directory of every newly registered node.
///
/// Interpreting the directory (building a resource model, exposing it under
/// the backend's path prefix) is up to the implementation.
#[async_trait]
pub trait ResourceDirectorySink: Send + Sync {
    async fn process_resource_directory(&self, response: DiscoveryResponse, node: IpAddr);
}

/// A backend and the nodes registered with it.
pub struct BackendDescriptor {
    prefix: String,
    path_prefix: String,
    nodes: Mutex<HashMap<IpAddr, DateTime<Utc>>>,
    sink: Arc<dyn ResourceDirectorySink>,
}

impl BackendDescriptor {
    pub fn new(
        prefix: impl Into<String>,
        path_prefix: impl Into<String>,
        sink: Arc<dyn ResourceDirectorySink>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            path_prefix: path_prefix.into(),
            nodes: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Address prefix or hostname this backend owns.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Prefix rule: the prefix starts the address literal.
    pub fn matches_literal(&self, literal: &str) -> bool {
        literal.starts_with(&self.prefix)
    }

    /// Hostname rule: the prefix equals the hostname.
    pub fn matches_hostname(&self, hostname: &str) -> bool {
        hostname == self.prefix
    }

    /// Whether this backend owns a node with address text `literal` and,
    /// if known, host name `hostname`.
    pub fn matches(&self, literal: &str, hostname: Option<&str>) -> bool {
        self.matches_literal(literal) || hostname.is_some_and(|name| self.matches_hostname(name))
    }

    /// Registers `addr` unless it is already known.
    ///
    /// Check and insert happen under one lock, so of several concurrent
    /// callers for the same address exactly one gets `true`.
    pub fn try_register(&self, addr: IpAddr) -> bool {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&addr) {
            return false;
        }
        nodes.insert(addr, Utc::now());
        true
    }

    /// Removes `addr`; returns whether it was registered.
    pub fn forget(&self, addr: IpAddr) -> bool {
        self.nodes.lock().remove(&addr).is_some()
    }

    pub fn is_registered(&self, addr: IpAddr) -> bool {
        self.nodes.lock().contains_key(&addr)
    }

    pub fn registered_at(&self, addr: IpAddr) -> Option<DateTime<Utc>> {
        self.nodes.lock().get(&addr).copied()
    }

    /// Registered addresses, sorted.
    pub fn registered_nodes(&self) -> Vec<IpAddr> {
        let mut nodes: Vec<IpAddr> = self.nodes.lock().keys().copied().collect();
        nodes.sort();
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Hands a discovery response to the backend.
    pub async fn forward(&self, response: DiscoveryResponse, node: IpAddr) {
        self.sink.process_resource_directory(response, node).await;
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("prefix", &self.prefix)
            .field("path_prefix", &self.path_prefix)
            .field("nodes", &self.node_count())
            .finish()
    }
}

/// Ordered set of backends.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: ArcSwap<Vec<Arc<BackendDescriptor>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Appends a backend. Registering a prefix twice keeps both entries;
    /// the earlier one shadows the later.
    pub fn register(&self, backend: Arc<BackendDescriptor>) {
        self.backends.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&backend));
            next
        });

        debug!(
            prefix = backend.prefix(),
            path_prefix = backend.path_prefix(),
            "Registered backend"
        );
    }

    /// Current snapshot, in registration order.
    pub fn backends(&self) -> Arc<Vec<Arc<BackendDescriptor>>> {
        self.backends.load_full()
    }

    pub fn len(&self) -> usize {
        self.backends.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.load().is_empty()
    }

    /// First backend owning `addr`, looking up its hostname lazily and at
    /// most once: only when a backend is reached that the address text
    /// alone does not match.
    pub async fn resolve(
        &self,
        addr: IpAddr,
        resolver: &dyn HostnameResolver,
    ) -> Option<Arc<BackendDescriptor>> {
        let snapshot = self.backends.load_full();
        let literal = addr.to_string();
        let mut hostname: Option<String> = None;
        let mut looked_up = false;

        for backend in snapshot.iter() {
            if !looked_up && !backend.matches(&literal, None) {
                hostname = resolver.hostname(addr).await;
                looked_up = true;
            }
            if backend.matches(&literal, hostname.as_deref()) {
                debug!(
                    address = %literal,
                    hostname = ?hostname,
                    prefix = backend.prefix(),
                    "Backend found"
                );
                return Some(Arc::clone(backend));
            }
        }

        None
    }

    /// Matching rule with a hostname that is already known.
    pub fn resolve_with_hostname(
        &self,
        addr: IpAddr,
        hostname: Option<&str>,
    ) -> Option<Arc<BackendDescriptor>> {
        let literal = addr.to_string();
        self.backends
            .load()
            .iter()
            .find(|backend| backend.matches(&literal, hostname))
            .cloned()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{NoReverseLookup, StaticHostnames};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;

    #[async_trait]
    impl ResourceDirectorySink for NullSink {
        async fn process_resource_directory(&self, _response: DiscoveryResponse, _node: IpAddr) {}
    }

    struct CountingResolver {
        calls: AtomicUsize,
        name: Option<String>,
    }

    #[async_trait]
    impl HostnameResolver for CountingResolver {
        async fn hostname(&self, _addr: IpAddr) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.name.clone()
        }
    }

    fn backend(prefix: &str) -> Arc<BackendDescriptor> {
        Arc::new(BackendDescriptor::new(prefix, format!("/{prefix}"), Arc::new(NullSink)))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_keeps_order_and_duplicates() {
        let registry = BackendRegistry::new();
        let first = backend("10.0.");
        let second = backend("10.0.");
        registry.register(Arc::clone(&first));
        registry.register(Arc::clone(&second));
        registry.register(Arc::clone(&first));

        let backends = registry.backends();
        assert_eq!(registry.len(), 3);
        assert!(Arc::ptr_eq(&backends[0], &first));
        assert!(Arc::ptr_eq(&backends[1], &second));
        assert!(Arc::ptr_eq(&backends[2], &first));

        // the earliest entry shadows the duplicates
        let found = registry.resolve(ip("10.0.0.1"), &NoReverseLookup).await.unwrap();
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[tokio::test]
    async fn test_first_match_wins_over_more_specific() {
        let registry = BackendRegistry::new();
        let broad = backend("2001:db8::");
        let specific = backend("2001:db8::1");
        registry.register(Arc::clone(&broad));
        registry.register(Arc::clone(&specific));

        let found = registry.resolve(ip("2001:db8::1"), &NoReverseLookup).await.unwrap();
        assert!(Arc::ptr_eq(&found, &broad));
    }

    #[tokio::test]
    async fn test_order_only_matters_with_multiple_matches() {
        let a = backend("192.168.1.");
        let b = backend("10.");

        let forward = BackendRegistry::new();
        forward.register(Arc::clone(&a));
        forward.register(Arc::clone(&b));

        let reverse = BackendRegistry::new();
        reverse.register(Arc::clone(&b));
        reverse.register(Arc::clone(&a));

        for addr in ["192.168.1.20", "10.1.2.3"] {
            let x = forward.resolve(ip(addr), &NoReverseLookup).await.unwrap();
            let y = reverse.resolve(ip(addr), &NoReverseLookup).await.unwrap();
            assert!(Arc::ptr_eq(&x, &y), "{addr} resolved differently");
        }
    }

    #[tokio::test]
    async fn test_hostname_match() {
        let registry = BackendRegistry::new();
        let by_ip = backend("10.");
        let by_name = backend("sensor.example.org");
        registry.register(Arc::clone(&by_ip));
        registry.register(Arc::clone(&by_name));

        let resolver = StaticHostnames::new().with(ip("192.0.2.5"), "sensor.example.org");
        let found = registry.resolve(ip("192.0.2.5"), &resolver).await.unwrap();
        assert!(Arc::ptr_eq(&found, &by_name));

        // hostname must be equal, not a prefix
        let resolver = StaticHostnames::new().with(ip("192.0.2.5"), "sensor.example.org.lan");
        assert!(registry.resolve(ip("192.0.2.5"), &resolver).await.is_none());
    }

    #[tokio::test]
    async fn test_hostname_backend_registered_first_wins() {
        let registry = BackendRegistry::new();
        let by_name = backend("gateway.local");
        let by_ip = backend("10.");
        registry.register(Arc::clone(&by_name));
        registry.register(Arc::clone(&by_ip));

        let resolver = StaticHostnames::new().with(ip("10.0.0.1"), "gateway.local");
        let found = registry.resolve(ip("10.0.0.1"), &resolver).await.unwrap();
        assert!(Arc::ptr_eq(&found, &by_name));
    }

    #[tokio::test]
    async fn test_hostname_looked_up_lazily_once() {
        let registry = BackendRegistry::new();
        registry.register(backend("a.example.org"));
        registry.register(backend("b.example.org"));
        registry.register(backend("10."));

        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            name: None,
        };
        assert!(registry.resolve(ip("10.9.9.9"), &resolver).await.is_some());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        let only_prefix = BackendRegistry::new();
        only_prefix.register(backend("10."));
        assert!(only_prefix.resolve(ip("10.9.9.9"), &resolver).await.is_some());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_match() {
        let registry = BackendRegistry::new();
        registry.register(backend("fd00::"));
        assert!(registry.resolve(ip("2001:db8::1"), &NoReverseLookup).await.is_none());
        assert!(registry
            .resolve_with_hostname(ip("2001:db8::1"), Some("other"))
            .is_none());
    }

    #[tokio::test]
    async fn test_resolve_agrees_with_known_hostname_rule() {
        let registry = BackendRegistry::new();
        registry.register(backend("gateway.local"));
        registry.register(backend("10.1."));
        registry.register(backend("10."));
        registry.register(backend("sensor.example.org"));

        let resolver = StaticHostnames::new()
            .with(ip("10.1.0.1"), "gateway.local")
            .with(ip("192.0.2.9"), "sensor.example.org");

        for addr in ["10.1.0.1", "10.2.0.1", "192.0.2.9", "192.0.2.10"] {
            let addr = ip(addr);
            let hostname = resolver.hostname(addr).await;
            let lazy = registry.resolve(addr, &resolver).await;
            let known = registry.resolve_with_hostname(addr, hostname.as_deref());
            match (lazy, known) {
                (Some(a), Some(b)) => assert!(Arc::ptr_eq(&a, &b), "{addr} resolved differently"),
                (None, None) => {}
                (a, b) => panic!("{addr}: resolve gave {a:?}, known hostname gave {b:?}"),
            }
        }
    }

    #[test]
    fn test_resolve_with_hostname_matches_both_rules() {
        let registry = BackendRegistry::new();
        let by_name = backend("node.example.org");
        registry.register(Arc::clone(&by_name));

        let found = registry
            .resolve_with_hostname(ip("192.0.2.1"), Some("node.example.org"))
            .unwrap();
        assert!(Arc::ptr_eq(&found, &by_name));
        assert!(registry.resolve_with_hostname(ip("192.0.2.1"), None).is_none());
    }

    #[test]
    fn test_try_register_is_exclusive() {
        let descriptor = backend("10.");
        let addr = ip("10.0.0.1");

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| descriptor.try_register(addr)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as usize)
                .sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(descriptor.registered_nodes(), vec![addr]);
        assert!(descriptor.registered_at(addr).is_some());
    }

    #[test]
    fn test_forget() {
        let descriptor = backend("10.");
        let addr = ip("10.0.0.1");
        assert!(descriptor.try_register(addr));
        assert!(descriptor.forget(addr));
        assert!(!descriptor.is_registered(addr));
        assert!(!descriptor.forget(addr));
        assert!(descriptor.try_register(addr));
    }
}
