//! Single-use rendezvous between a waiting worker and the transport.
//!
//! A `ResponseBridge` is shared (`Arc`) between the registration task, which
//! awaits it, and whatever delivers the response, usually the transport's
//! receive loop. The first `complete` or `fail` wins; later calls are
//! ignored and reported with a warning.

use crate::error::{RegistrationError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub struct ResponseBridge<T> {
    tx: Mutex<Option<oneshot::Sender<Result<T>>>>,
    rx: Mutex<Option<oneshot::Receiver<Result<T>>>>,
    fulfilled: AtomicBool,
}

impl<T> ResponseBridge<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            fulfilled: AtomicBool::new(false),
        }
    }

    /// Fulfils the bridge with a value. Returns `false` if it was already
    /// fulfilled.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Fulfils the bridge with an error. Returns `false` if it was already
    /// fulfilled.
    pub fn fail(&self, error: RegistrationError) -> bool {
        self.resolve(Err(error))
    }

    /// Whether `complete` or `fail` has been called.
    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled.load(Ordering::SeqCst)
    }

    fn resolve(&self, result: Result<T>) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            warn!("Response bridge already fulfilled, ignoring second result");
            return false;
        };

        self.fulfilled.store(true, Ordering::SeqCst);

        if tx.send(result).is_err() {
            // the waiter gave up (timeout) before the response arrived
            debug!("Response arrived after the waiter left");
        }
        true
    }

    /// Waits for the bridge to be fulfilled.
    ///
    /// With a timeout, an unanswered bridge resolves to
    /// `RegistrationError::TimedOut`. A bridge can only be awaited once.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<T> {
        let rx = self.rx.lock().take().ok_or_else(|| {
            RegistrationError::Interrupted("response bridge already awaited".to_string())
        })?;

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| RegistrationError::TimedOut { after: limit })?,
            None => rx.await,
        };

        received.map_err(|_| {
            RegistrationError::Interrupted("responder dropped before answering".to_string())
        })?
    }
}

impl<T> Default for ResponseBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ResponseBridge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBridge")
            .field("fulfilled", &self.is_fulfilled())
            .finish()
    }
}
