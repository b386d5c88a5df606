//! Node registration workflow for the CoAP proxy.
//!
//! Devices announce themselves with `POST /here_i_am`. For every
//! announcement this crate:
//! 1. Acknowledges the request synchronously (`RegistrationListener`)
//! 2. Queues a `RegistrationTask` on a bounded worker pool
//! 3. Resolves the owning backend by address prefix or hostname
//!    (`BackendRegistry`, first match wins)
//! 4. Registers the node once per backend, skipping known nodes
//! 5. Requests `/.well-known/core` through a `DiscoveryClient` and waits on a
//!    `ResponseBridge` for the answer
//! 6. Hands the response to the backend's `ResourceDirectorySink`
//!
//! The wire transport is not part of this crate; `coapreg-transport`
//! provides a UDP implementation of `DiscoveryClient` and feeds inbound
//! requests to the listener.
//!
//! # Example
//!
//! ```no_run
//! use coapreg_registration::{
//!     BackendDescriptor, BackendRegistry, DiscoveryClient, NoReverseLookup,
//!     RegistrationService, ResourceDirectorySink, ServiceOptions,
//! };
//! use std::sync::Arc;
//!
//! async fn run(
//!     client: Arc<dyn DiscoveryClient>,
//!     sink: Arc<dyn ResourceDirectorySink>,
//! ) -> coapreg_registration::Result<()> {
//!     let registry = Arc::new(BackendRegistry::new());
//!     registry.register(Arc::new(BackendDescriptor::new("2001:db8::", "/lab", sink)));
//!
//!     let service = RegistrationService::new(
//!         ServiceOptions::default(),
//!         registry,
//!         client,
//!         Arc::new(NoReverseLookup),
//!     )?;
//!     service.start()?;
//!
//!     let listener = service.listener();
//!     // hand `listener` to the transport ...
//!
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod client;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod task;

pub use bridge::ResponseBridge;
pub use client::{DiscoveryClient, DiscoveryTarget, DEFAULT_COAP_PORT, WELL_KNOWN_CORE};
pub use error::{RegistrationError, Result};
pub use listener::RegistrationListener;
pub use metrics::{RegistrationMetrics, RegistrationStats};
pub use registry::{BackendDescriptor, BackendRegistry, ResourceDirectorySink};
pub use resolver::{HostnameResolver, NoReverseLookup, ReverseDnsResolver, StaticHostnames};
pub use service::{RegistrationService, ServiceOptions};
pub use task::{RegistrationTask, TaskContext, TaskOutcome, TaskSettings, TaskState};
