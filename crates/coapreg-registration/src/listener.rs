//! Inbound announcement handling.
//!
//! `handle` runs on the transport's receive loop, which processes one
//! datagram at a time, so it must never wait: it answers from the request
//! alone and hands the registration to the worker pool with a non-blocking
//! send.

use crate::error::{RegistrationError, Result};
use crate::metrics::RegistrationMetrics;
use crate::task::RegistrationTask;
use coapreg_core::types::{InboundRequest, Method, Reply, ResponseCode};
use flume::TrySendError;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Validates announcements and schedules registrations.
#[derive(Debug, Clone)]
pub struct RegistrationListener {
    registration_path: String,
    queue: flume::Sender<RegistrationTask>,
    metrics: Arc<RegistrationMetrics>,
}

impl RegistrationListener {
    pub fn new(
        registration_path: impl Into<String>,
        queue: flume::Sender<RegistrationTask>,
        metrics: Arc<RegistrationMetrics>,
    ) -> Self {
        Self {
            registration_path: registration_path.into(),
            queue,
            metrics,
        }
    }

    pub fn registration_path(&self) -> &str {
        &self.registration_path
    }

    /// Answers an inbound request.
    ///
    /// Returns the reply to send, or `None` for a non-confirmable
    /// announcement, which gets no reply at all. The reply never depends on
    /// whether the registration later succeeds.
    pub fn handle(&self, request: &InboundRequest) -> Option<Reply> {
        debug!(
            source = %request.source,
            path = %request.path,
            method = %request.method,
            "Received request"
        );

        if request.path != self.registration_path {
            return Some(Reply::empty(ResponseCode::NOT_FOUND));
        }

        if request.method != Method::Post {
            return Some(Reply::empty(ResponseCode::METHOD_NOT_ALLOWED));
        }

        self.metrics.record_announcement();
        let remote = node_address(request.source.ip());
        match self.schedule(remote) {
            Ok(()) => {
                self.metrics.record_scheduled();
                debug!(remote = %remote, "Scheduled request for .well-known/core");
            }
            Err(e) => {
                self.metrics.record_rejected();
                warn!(remote = %remote, error = %e, kind = e.kind(), "Announcement dropped");
            }
        }

        request
            .kind
            .is_confirmable()
            .then(|| Reply::empty(ResponseCode::CONTENT))
    }

    /// Queues a registration for `remote` without waiting for room.
    pub fn schedule(&self, remote: IpAddr) -> Result<()> {
        self.queue
            .try_send(RegistrationTask::new(remote))
            .map_err(|e| match e {
                TrySendError::Full(_) => RegistrationError::QueueFull,
                TrySendError::Disconnected(_) => RegistrationError::NotRunning,
            })
    }
}

/// Address a node is registered under. IPv4 peers reaching a dual-stack
/// socket show up as `::ffff:a.b.c.d` and are registered by their IPv4
/// address.
pub fn node_address(addr: IpAddr) -> IpAddr {
    addr.to_canonical()
}
