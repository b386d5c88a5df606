//! Error types for the registration workflow

use std::time::Duration;
use thiserror::Error;

/// Result type alias for registration operations
pub type Result<T> = std::result::Result<T, RegistrationError>;

/// Errors that can end a registration task or reject a service call.
///
/// None of these reach the announcing device: its acknowledgement is sent
/// before the task runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// The device address cannot be turned into a request target
    #[error("Malformed discovery target '{target}': {reason}")]
    MalformedTarget { target: String, reason: String },

    /// The discovery request could not be built
    #[error("Failed to construct discovery request: {0}")]
    RequestConstruction(String),

    /// The transport could not deliver the request or the device rejected it
    #[error("Discovery request to {target} failed: {reason}")]
    Delivery { target: String, reason: String },

    /// No response arrived in time
    #[error("No discovery response after {}ms", .after.as_millis())]
    TimedOut { after: Duration },

    /// The wait ended without a response (responder dropped, bridge reused)
    #[error("Discovery wait interrupted: {0}")]
    Interrupted(String),

    /// The work queue is full
    #[error("Registration queue is full")]
    QueueFull,

    /// Registration service is not running
    #[error("Registration service is not running")]
    NotRunning,

    /// Registration service was already started
    #[error("Registration service is already running")]
    AlreadyRunning,

    /// Invalid service options
    #[error("Invalid registration options: {0}")]
    InvalidOptions(String),
}

impl RegistrationError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistrationError::MalformedTarget { .. } => "malformed_target",
            RegistrationError::RequestConstruction(_) => "request_construction",
            RegistrationError::Delivery { .. } => "delivery",
            RegistrationError::TimedOut { .. } => "timed_out",
            RegistrationError::Interrupted(_) => "interrupted",
            RegistrationError::QueueFull => "queue_full",
            RegistrationError::NotRunning => "not_running",
            RegistrationError::AlreadyRunning => "already_running",
            RegistrationError::InvalidOptions(_) => "invalid_options",
        }
    }
}
