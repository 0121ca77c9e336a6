//! # Gatekeeper Core
//!
//! Shared model, configuration, and logging utilities for the Gatekeeper
//! plugin runtime and the connector service manager.

pub mod types;
pub mod config;
pub mod error;
pub mod log_history;
pub mod telemetry;

// Re-export commonly used types
pub use config::Properties;
pub use error::{CoreError, Result};
pub use log_history::RateLimitedLogger;
pub use types::{Service, ServiceDef, ServicePolicies};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
