//! Error types for the plugin runtime

use thiserror::Error;

/// Failures reported by the admin client when talking to the policy authority
#[derive(Debug, Error)]
pub enum AdminError {
    /// The request never reached the authority, or the reply was lost
    #[error("Transport error: {0}")]
    Transport(String),

    /// The authority rejected the request
    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// The caller is not permitted to perform the mutation
    #[error("Access denied: {0}")]
    AccessDenied(String),
}

/// Plugin runtime errors
#[derive(Debug, Error)]
pub enum PluginError {
    /// No admin client is available (plugin not initialized or already cleaned up)
    #[error("admin client is not available for service type '{0}'")]
    AdminClientUnavailable(String),

    /// Administrative call failed
    #[error("Admin call failed: {0}")]
    Admin(#[from] AdminError),

    /// Policy refresher could not be started
    #[error("Policy refresher error: {0}")]
    Refresher(String),
}

impl PluginError {
    /// Whether retrying the same call can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PluginError::Admin(AdminError::Transport(_)))
    }
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;
