//! Error types for Parley.

use thiserror::Error;

/// Primary error type for all Parley operations.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Session is already connecting")]
    AlreadyConnecting,

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Remote connection failed: {0}")]
    RemoteConnectionFailed(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ParleyError {
    /// Whether this error is a `connect()` precondition violation.
    pub fn is_connect_precondition(&self) -> bool {
        matches!(self, Self::AlreadyConnected | Self::AlreadyConnecting)
    }

    /// Whether calling again from `disconnected` may succeed.
    ///
    /// Nothing in this crate retries; the classification is for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteConnectionFailed(_) | Self::Timeout(_) | Self::Io(_)
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ParleyError>;
