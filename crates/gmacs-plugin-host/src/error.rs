//! Error types for the gmacs plugin host

use gmacs_plugin_sdk::{HandshakeFailure, PluginError};
use std::time::Duration;
use thiserror::Error;

use crate::editor::EditorError;
use crate::plugins::spec_registry::SpecConflict;

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur in host operations
#[derive(Debug, Error)]
pub enum HostError {
    /// The plugin process never completed the handshake
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeFailure),

    /// The channel to the plugin dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// The plugin's implementation returned an error
    #[error("Remote call error ({code}): {message}")]
    RemoteCall { code: i32, message: String },

    /// A buffer or window handle no longer names a live object
    #[error("Stale handle: {0}")]
    StaleHandle(String),

    /// A plugin's specs collide with specs already registered
    #[error("Spec conflict: {0}")]
    SpecConflict(#[from] SpecConflict),

    /// The external build step failed
    #[error("Build error: {0}")]
    Build(String),

    /// No response within the call bound
    #[error("Call to {method} timed out after {timeout:?}")]
    CallTimeout { method: String, timeout: Duration },

    /// The plugin process could not be started
    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Plugin not registered: {0}")]
    NotFound(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("No plugin provides mode '{0}'")]
    ModeNotFound(String),

    /// The operation is not valid in the plugin's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Plugin is disabled: {0}")]
    Disabled(String),

    /// The plugin requires a newer host
    #[error("Plugin {plugin} requires gmacs {required}, host is {host}")]
    IncompatibleHost {
        plugin: String,
        required: String,
        host: String,
    },

    #[error("Plugin {plugin} depends on {dependency}, which is not loaded")]
    MissingDependency { plugin: String, dependency: String },

    /// Invalid manifest
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// `Initialize` sent twice to the same plugin instance
    #[error("Plugin already initialized: {0}")]
    AlreadyInitialized(String),

    /// The editor rejected a capability call
    #[error("Editor error: {0}")]
    Editor(#[from] EditorError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HostError {
    /// Whether the plugin's connection is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HostError::Transport(_) | HostError::CallTimeout { .. }
        )
    }
}

impl From<PluginError> for HostError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Handshake(failure) => HostError::Handshake(failure),
            PluginError::Transport(msg) => HostError::Transport(msg),
            PluginError::Remote { code, message } => HostError::RemoteCall { code, message },
            PluginError::StaleHandle(msg) => HostError::StaleHandle(msg),
            PluginError::CallTimeout { method, timeout } => {
                HostError::CallTimeout { method, timeout }
            }
            PluginError::AlreadyInitialized => {
                HostError::AlreadyInitialized("plugin rejected a second Initialize".into())
            }
            PluginError::Io(e) => HostError::Io(e),
            PluginError::Json(e) => HostError::Json(e),
            other => {
                let rpc = gmacs_plugin_sdk::protocol::RpcError::from(&other);
                HostError::RemoteCall {
                    code: rpc.code,
                    message: rpc.message,
                }
            }
        }
    }
}
