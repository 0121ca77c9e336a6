//! Error types shared by the Gatekeeper crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
