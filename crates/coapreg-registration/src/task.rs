//! Per-node registration workflow.
//!
//! ```text
//! Created -> Resolving -> NoBackend
//!                      -> Resolved -> Deduping -> AlreadyRegistered
//!                                              -> NewlyRegistered -> Requesting -> Waiting
//!                                                    Waiting -> ResponseReceived -> Forwarded
//!                                                    Waiting -> Failed
//! ```
//!
//! The node is registered with its backend before the discovery request is
//! sent, so a repeated announcement arriving while the first discovery is in
//! flight stops at `AlreadyRegistered`.

use crate::bridge::ResponseBridge;
use crate::client::{DiscoveryClient, DiscoveryTarget, DEFAULT_COAP_PORT};
use crate::error::{RegistrationError, Result};
use crate::metrics::RegistrationMetrics;
use crate::registry::{BackendDescriptor, BackendRegistry};
use crate::resolver::HostnameResolver;
use coapreg_core::types::DiscoveryResponse;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Resolving,
    NoBackend,
    Resolved,
    Deduping,
    AlreadyRegistered,
    NewlyRegistered,
    Requesting,
    Waiting,
    ResponseReceived,
    Forwarded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::NoBackend
                | TaskState::AlreadyRegistered
                | TaskState::Forwarded
                | TaskState::Failed
        )
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    NoBackend,
    AlreadyRegistered,
    Forwarded,
    Failed(RegistrationError),
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::NoBackend => "no_backend",
            TaskOutcome::AlreadyRegistered => "already_registered",
            TaskOutcome::Forwarded => "forwarded",
            TaskOutcome::Failed(_) => "failed",
        }
    }

    /// Terminal state matching this outcome.
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::NoBackend => TaskState::NoBackend,
            TaskOutcome::AlreadyRegistered => TaskState::AlreadyRegistered,
            TaskOutcome::Forwarded => TaskState::Forwarded,
            TaskOutcome::Failed(_) => TaskState::Failed,
        }
    }
}

/// Knobs shared by all tasks.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub discovery_port: u16,
    /// `None` waits forever.
    pub discovery_timeout: Option<Duration>,
    /// Roll back the registration when discovery fails.
    pub forget_failed_nodes: bool,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_COAP_PORT,
            discovery_timeout: Some(Duration::from_secs(60)),
            forget_failed_nodes: false,
        }
    }
}

/// Everything a worker needs to run tasks.
pub struct TaskContext {
    pub registry: Arc<BackendRegistry>,
    pub client: Arc<dyn DiscoveryClient>,
    pub resolver: Arc<dyn HostnameResolver>,
    pub settings: TaskSettings,
    pub metrics: Arc<RegistrationMetrics>,
}

/// Registration of one announcing node.
#[derive(Debug)]
pub struct RegistrationTask {
    id: Uuid,
    remote: IpAddr,
    state: TaskState,
    bridge: Arc<ResponseBridge<DiscoveryResponse>>,
}

impl RegistrationTask {
    pub fn new(remote: IpAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote,
            state: TaskState::Created,
            bridge: Arc::new(ResponseBridge::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote(&self) -> IpAddr {
        self.remote
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Runs the workflow to a terminal state.
    #[instrument(
        name = "registration",
        skip_all,
        fields(task_id = %self.id, remote = %self.remote)
    )]
    pub async fn run(mut self, ctx: &TaskContext) -> TaskOutcome {
        let outcome = self.drive(ctx).await;
        debug_assert_eq!(self.state, outcome.state());
        ctx.metrics.record_outcome(&outcome);
        outcome
    }

    async fn drive(&mut self, ctx: &TaskContext) -> TaskOutcome {
        self.transition(TaskState::Resolving);
        let Some(backend) = ctx.registry.resolve(self.remote, ctx.resolver.as_ref()).await else {
            debug!("No backend found for address");
            self.transition(TaskState::NoBackend);
            return TaskOutcome::NoBackend;
        };
        self.transition(TaskState::Resolved);

        self.transition(TaskState::Deduping);
        if !backend.try_register(self.remote) {
            debug!(backend = backend.prefix(), "Remote address already known");
            self.transition(TaskState::AlreadyRegistered);
            return TaskOutcome::AlreadyRegistered;
        }
        self.transition(TaskState::NewlyRegistered);
        info!(backend = backend.prefix(), "New sensor node");

        match self.discover(ctx).await {
            Ok(response) => {
                self.transition(TaskState::ResponseReceived);
                if !response.is_success() {
                    warn!(code = %response.code, "Discovery answered with an error code");
                }
                backend.forward(response, self.remote).await;
                self.transition(TaskState::Forwarded);
                TaskOutcome::Forwarded
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Node registration failed");
                self.transition(TaskState::Failed);
                self.roll_back(&backend, ctx);
                TaskOutcome::Failed(e)
            }
        }
    }

    async fn discover(&mut self, ctx: &TaskContext) -> Result<DiscoveryResponse> {
        self.transition(TaskState::Requesting);
        let target = DiscoveryTarget::new(self.remote, ctx.settings.discovery_port)?;

        ctx.client
            .send_discovery(&target, Arc::clone(&self.bridge))
            .await?;
        debug!(target = %target, "Request for /.well-known/core written");

        self.transition(TaskState::Waiting);
        self.bridge.wait(ctx.settings.discovery_timeout).await
    }

    fn roll_back(&self, backend: &BackendDescriptor, ctx: &TaskContext) {
        if ctx.settings.forget_failed_nodes && backend.forget(self.remote) {
            info!(
                backend = backend.prefix(),
                "Registration rolled back, next announcement retries"
            );
        }
    }

    fn transition(&mut self, next: TaskState) {
        trace!(from = ?self.state, to = ?next, "Task state");
        self.state = next;
    }
}
