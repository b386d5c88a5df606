//! Error types shared by the coapreg crates.
//!
//! Registration-specific failures live next to the workflow in
//! `coapreg-registration`; socket errors are reported by the transport.
//! This module covers configuration.

use thiserror::Error;

/// Result type alias using `CoapRegError` as the error type.
pub type Result<T> = std::result::Result<T, CoapRegError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum CoapRegError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// A backend entry cannot be used for matching
    #[error("Invalid backend #{index}: {reason}")]
    InvalidBackend { index: usize, reason: String },
}

impl ConfigError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid backend error.
    pub fn invalid_backend(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidBackend {
            index,
            reason: reason.into(),
        }
    }
}
