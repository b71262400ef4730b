//! Error types for Murmur

use thiserror::Error;

/// Main error type for Murmur operations
#[derive(Debug, Error)]
pub enum MurmurError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Audio or speech provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Voice transport or session error
    #[error("Voice error: {0}")]
    Voice(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error (generic)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Convenient Result type using MurmurError
pub type Result<T> = std::result::Result<T, MurmurError>;

impl MurmurError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        MurmurError::Config(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        MurmurError::Provider(msg.into())
    }

    /// Create a voice error
    pub fn voice(msg: impl Into<String>) -> Self {
        MurmurError::Voice(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        MurmurError::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        MurmurError::NotFound(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        MurmurError::Timeout(msg.into())
    }

    /// Whether this error came from an elapsed deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, MurmurError::Timeout(_))
    }
}
