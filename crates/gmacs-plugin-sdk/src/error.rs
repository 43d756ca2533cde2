//! Error types for the gmacs plugin SDK

use std::time::Duration;
use thiserror::Error;

use crate::handshake::HandshakeFailure;

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors that can occur on either side of a plugin connection
#[derive(Debug, Error)]
pub enum PluginError {
    /// The connection was never established
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    /// The connection dropped or could not carry the message
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The remote side answered with an error
    #[error("Remote call failed ({code}): {message}")]
    Remote { code: i32, message: String },

    /// A buffer or window handle outlived the host object it referred to
    #[error("Stale handle: {0}")]
    StaleHandle(String),

    /// No response arrived within the call bound
    #[error("Call to {method} timed out after {timeout:?}")]
    CallTimeout { method: String, timeout: Duration },

    /// An operational call arrived before `Initialize`
    #[error("Plugin is not initialized")]
    NotInitialized,

    /// `Initialize` arrived twice
    #[error("Plugin is already initialized")]
    AlreadyInitialized,

    /// The plugin does not implement the requested role
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Invalid parameters for a call
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The plugin implementation reported a failure
    #[error("{0}")]
    Failed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    /// Create a plugin failure from a message
    pub fn failed(msg: impl Into<String>) -> Self {
        PluginError::Failed(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(operation: impl Into<String>) -> Self {
        PluginError::Unsupported(operation.into())
    }

    /// Whether the error means the connection itself is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PluginError::Transport(_) | PluginError::CallTimeout { .. }
        )
    }
}
