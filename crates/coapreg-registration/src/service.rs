//! Registration service: bounded worker pool plus the listener that feeds
//! it.
//!
//! Each worker takes one task at a time and keeps it until the task
//! terminates, including the wait for the discovery response. The number of
//! workers therefore bounds the number of discoveries in flight; further
//! announcements wait in the queue, and once the queue is full they are
//! dropped (the device was already acknowledged).

use crate::client::DiscoveryClient;
use crate::error::{RegistrationError, Result};
use crate::listener::RegistrationListener;
use crate::metrics::{RegistrationMetrics, RegistrationStats};
use crate::registry::BackendRegistry;
use crate::resolver::HostnameResolver;
use crate::task::{RegistrationTask, TaskContext, TaskSettings};
use coapreg_core::config::{RegistrationConfig, ServerConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Service construction options.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub registration_path: String,
    pub task: TaskSettings,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            workers: 20,
            queue_capacity: 1024,
            registration_path: "/here_i_am".to_string(),
            task: TaskSettings::default(),
        }
    }
}

impl ServiceOptions {
    pub fn from_config(server: &ServerConfig, registration: &RegistrationConfig) -> Self {
        Self {
            workers: registration.workers,
            queue_capacity: registration.queue_capacity,
            registration_path: server.registration_path.clone(),
            task: TaskSettings {
                discovery_port: registration.discovery_port,
                discovery_timeout: Some(registration.discovery_timeout()),
                forget_failed_nodes: registration.forget_failed_nodes,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RegistrationError::InvalidOptions(
                "workers cannot be 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(RegistrationError::InvalidOptions(
                "queue_capacity cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct RegistrationService {
    options: ServiceOptions,
    context: Arc<TaskContext>,
    queue_tx: flume::Sender<RegistrationTask>,
    queue_rx: Mutex<Option<flume::Receiver<RegistrationTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl RegistrationService {
    pub fn new(
        options: ServiceOptions,
        registry: Arc<BackendRegistry>,
        client: Arc<dyn DiscoveryClient>,
        resolver: Arc<dyn HostnameResolver>,
    ) -> Result<Self> {
        options.validate()?;

        let (queue_tx, queue_rx) = flume::bounded(options.queue_capacity);
        let context = Arc::new(TaskContext {
            registry,
            client,
            resolver,
            settings: options.task.clone(),
            metrics: Arc::new(RegistrationMetrics::new()),
        });

        info!(
            workers = options.workers,
            queue_capacity = options.queue_capacity,
            path = %options.registration_path,
            "Registration service created"
        );

        Ok(Self {
            options,
            context,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            workers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Spawns the workers. A stopped service cannot be restarted.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RegistrationError::AlreadyRunning);
        }

        let Some(rx) = self.queue_rx.lock().clone() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(RegistrationError::NotRunning);
        };

        let mut workers = self.workers.lock();
        for worker_id in 0..self.options.workers {
            let rx = rx.clone();
            let ctx = Arc::clone(&self.context);
            let shutdown = self.shutdown.clone();
            workers.push(tokio::spawn(worker_loop(worker_id, rx, ctx, shutdown)));
        }

        info!(workers = self.options.workers, "Registration service started");
        Ok(())
    }

    /// Stops accepting work and waits for the workers.
    ///
    /// Idle workers exit immediately; a worker in the middle of a task
    /// finishes it first (at most the discovery timeout). Announcements
    /// still queued are dropped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping registration service");
        self.shutdown.cancel();
        if let Some(rx) = self.queue_rx.lock().take() {
            let dropped = rx.drain().count();
            if dropped > 0 {
                warn!(dropped, "Queued announcements dropped on shutdown");
            }
        }

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Registration worker ended abnormally");
            }
        }

        info!("Registration service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Listener feeding this service's queue.
    pub fn listener(&self) -> RegistrationListener {
        RegistrationListener::new(
            self.options.registration_path.clone(),
            self.queue_tx.clone(),
            Arc::clone(&self.context.metrics),
        )
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.context.registry
    }

    pub fn stats(&self) -> RegistrationStats {
        self.context.metrics.snapshot()
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: flume::Receiver<RegistrationTask>,
    ctx: Arc<TaskContext>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "Registration worker started");

    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = rx.recv_async() => match received {
                Ok(task) => task,
                Err(_) => break,
            },
        };

        task.run(&ctx).await;
    }

    debug!(worker_id, "Registration worker stopped");
}

impl Drop for RegistrationService {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("Registration service dropped while still running");
            self.shutdown.cancel();
        }
    }
}
