//! Error types for connector resolution and invocation

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a connector's backend, with data for the caller
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    pub response_data: HashMap<String, Value>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response_data: HashMap::new(),
        }
    }

    /// Attach a response data entry (e.g. `fieldName`, `description`)
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.response_data.insert(key.into(), value.into());
        self
    }
}

/// Connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Connector class could not be loaded for a service type
    #[error("{service_type} failed to find service class {class_name}. Resource lookup will not be available")]
    Resolution {
        service_type: String,
        class_name: String,
    },

    /// No service definition exists for the service type
    #[error("Service type not found: {0}")]
    ServiceTypeNotFound(String),

    /// No service with the given name
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Operation did not complete within its deadline
    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// Backend rejected the call
    #[error("Connector backend error: {0}")]
    Backend(BackendError),

    /// Any other connector or store failure
    #[error("Connector call failed: {0:#}")]
    Failed(anyhow::Error),

    /// Connector panicked while running an operation
    #[error("Connector panicked during {0}")]
    Panicked(String),
}

impl ConnectorError {
    /// Response data carried by a backend failure
    pub fn response_data(&self) -> Option<&HashMap<String, Value>> {
        match self {
            ConnectorError::Backend(e) => Some(&e.response_data),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectorError::Timeout { .. })
    }
}

impl From<anyhow::Error> for ConnectorError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BackendError>() {
            Ok(backend) => ConnectorError::Backend(backend),
            Err(err) => ConnectorError::Failed(err),
        }
    }
}

impl From<BackendError> for ConnectorError {
    fn from(err: BackendError) -> Self {
        ConnectorError::Backend(err)
    }
}

/// Result type for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;
