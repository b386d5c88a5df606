//! # coapreg core
//!
//! Core types, error handling, and configuration for the CoAP node
//! registration proxy.
//!
//! - **Types**: transport-neutral views of CoAP messages (`InboundRequest`,
//!   `Reply`, `DiscoveryResponse`) so the registration workflow never touches
//!   the wire codec.
//! - **Errors**: `thiserror` based error types for configuration and
//!   top-level failures.
//! - **Configuration**: YAML files with `COAPREG__*` environment overrides
//!   and validation.
//!
//! ## Example
//!
//! ```
//! use coapreg_core::config::AppConfig;
//!
//! let config = AppConfig::from_yaml(
//!     r#"
//! backends:
//!   - prefix: "2001:db8::"
//!     path_prefix: "/lab"
//! "#,
//! )
//! .unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.registration.workers, 20);
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{CoapRegError, ConfigError, Result};
pub use types::{DiscoveryResponse, InboundRequest, MessageKind, Method, Reply, ResponseCode};
