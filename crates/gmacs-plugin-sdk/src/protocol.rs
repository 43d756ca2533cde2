//! JSON-RPC 2.0 protocol types for plugin communication
//!
//! Host and plugin exchange newline-delimited JSON-RPC 2.0 objects over a
//! single channel. Both sides send requests, so every frame is either a
//! request or a response and is routed by its `id`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PluginError;
use crate::types::{ChangeSpec, HandleId};

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Stable method names. Renaming any of these requires a protocol version bump.
pub mod methods {
    /// Calls the host makes into a plugin
    pub mod plugin {
        pub const NAME: &str = "Plugin.Name";
        pub const VERSION: &str = "Plugin.Version";
        pub const DESCRIPTION: &str = "Plugin.Description";
        pub const INITIALIZE: &str = "Plugin.Initialize";
        pub const CLEANUP: &str = "Plugin.Cleanup";
        pub const GET_COMMANDS: &str = "Plugin.GetCommands";
        pub const GET_MAJOR_MODES: &str = "Plugin.GetMajorModes";
        pub const GET_MINOR_MODES: &str = "Plugin.GetMinorModes";
        pub const GET_KEY_BINDINGS: &str = "Plugin.GetKeyBindings";
        pub const HANDLE_HOOK: &str = "Plugin.HandleHook";

        // Command role
        pub const EXECUTE_COMMAND: &str = "Plugin.ExecuteCommand";
        pub const GET_COMPLETIONS: &str = "Plugin.GetCompletions";

        // Major mode role
        pub const ON_ACTIVATE: &str = "Plugin.OnActivate";
        pub const ON_DEACTIVATE: &str = "Plugin.OnDeactivate";
        pub const ON_FILE_OPEN: &str = "Plugin.OnFileOpen";
        pub const ON_FILE_SAVE: &str = "Plugin.OnFileSave";

        // Minor mode role
        pub const ENABLE: &str = "Plugin.Enable";
        pub const DISABLE: &str = "Plugin.Disable";
        pub const IS_ENABLED: &str = "Plugin.IsEnabled";
        pub const ON_BUFFER_CHANGE: &str = "Plugin.OnBufferChange";
        pub const ON_CURSOR_MOVE: &str = "Plugin.OnCursorMove";
    }

    /// Calls a plugin makes into the host
    pub mod host {
        pub const SET_STATUS: &str = "Host.SetStatus";
        pub const SHOW_MESSAGE: &str = "Host.ShowMessage";
        pub const EXECUTE_COMMAND: &str = "Host.ExecuteCommand";
        pub const SET_MAJOR_MODE: &str = "Host.SetMajorMode";
        pub const TOGGLE_MINOR_MODE: &str = "Host.ToggleMinorMode";
        pub const ADD_HOOK: &str = "Host.AddHook";
        pub const TRIGGER_HOOK: &str = "Host.TriggerHook";
        pub const CREATE_BUFFER: &str = "Host.CreateBuffer";
        pub const FIND_BUFFER: &str = "Host.FindBuffer";
        pub const SWITCH_TO_BUFFER: &str = "Host.SwitchToBuffer";
        pub const OPEN_FILE: &str = "Host.OpenFile";
        pub const SAVE_BUFFER: &str = "Host.SaveBuffer";
        pub const GET_OPTION: &str = "Host.GetOption";
        pub const SET_OPTION: &str = "Host.SetOption";
        pub const GET_CURRENT_BUFFER: &str = "Host.GetCurrentBuffer";
        pub const GET_CURRENT_WINDOW: &str = "Host.GetCurrentWindow";
    }

    /// Accessors resolved against a host-side buffer
    pub mod buffer {
        pub const NAME: &str = "Buffer.Name";
        pub const CONTENT: &str = "Buffer.Content";
        pub const SET_CONTENT: &str = "Buffer.SetContent";
        pub const INSERT_AT: &str = "Buffer.InsertAt";
        pub const DELETE_RANGE: &str = "Buffer.DeleteRange";
        pub const CURSOR_POSITION: &str = "Buffer.CursorPosition";
        pub const SET_CURSOR_POSITION: &str = "Buffer.SetCursorPosition";
        pub const MARK_DIRTY: &str = "Buffer.MarkDirty";
        pub const IS_DIRTY: &str = "Buffer.IsDirty";
        pub const FILENAME: &str = "Buffer.Filename";
    }

    /// Accessors resolved against a host-side window
    pub mod window {
        pub const BUFFER: &str = "Window.Buffer";
        pub const SET_BUFFER: &str = "Window.SetBuffer";
        pub const WIDTH: &str = "Window.Width";
        pub const HEIGHT: &str = "Window.Height";
        pub const SCROLL_OFFSET: &str = "Window.ScrollOffset";
        pub const SET_SCROLL_OFFSET: &str = "Window.SetScrollOffset";
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: serde_json::Value,
    /// Request ID
    pub id: u64,
}

impl RpcRequest {
    /// Create a new request
    pub fn new<P: Serialize>(method: &str, params: P, id: u64) -> Result<Self, serde_json::Error> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: serde_json::to_value(params)?,
            id,
        })
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Result (mutually exclusive with error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error (mutually exclusive with result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Request ID this is responding to
    pub id: u64,
}

impl RpcResponse {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Check if the response indicates success
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Decode the result, mapping error objects back into typed errors.
    ///
    /// A response with neither `result` nor `error` decodes as `null`, which is
    /// how unit results travel.
    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> Result<T, PluginError> {
        if let Some(err) = self.error {
            return Err(err.into_plugin_error());
        }
        let value = self.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(PluginError::from)
    }
}

/// A single frame on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid request - Not a valid JSON-RPC request
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Custom error codes (server-defined: -32000 to -32099)
    /// The plugin implementation failed
    pub const PLUGIN_ERROR: i32 = -32000;
    /// A handle no longer refers to a live host object
    pub const STALE_HANDLE: i32 = -32001;
    /// Operational call before `Initialize`
    pub const NOT_INITIALIZED: i32 = -32002;
    /// Second `Initialize`
    pub const ALREADY_INITIALIZED: i32 = -32003;
    /// Role method the plugin does not implement
    pub const UNSUPPORTED: i32 = -32004;
    /// The host could not carry out a capability call
    pub const HOST_ERROR: i32 = -32005;
}

impl RpcError {
    /// Create an error with an arbitrary code
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a method not found error
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    /// Create an invalid params error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }

    /// Create a stale handle error
    pub fn stale_handle(message: impl Into<String>) -> Self {
        Self::new(error_codes::STALE_HANDLE, message)
    }

    /// Create a host-side failure
    pub fn host_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::HOST_ERROR, message)
    }

    /// Map the error object back into a typed error
    pub fn into_plugin_error(self) -> PluginError {
        match self.code {
            error_codes::STALE_HANDLE => PluginError::StaleHandle(self.message),
            error_codes::NOT_INITIALIZED => PluginError::NotInitialized,
            error_codes::ALREADY_INITIALIZED => PluginError::AlreadyInitialized,
            error_codes::UNSUPPORTED => PluginError::Unsupported(self.message),
            code => PluginError::Remote {
                code,
                message: self.message,
            },
        }
    }
}

impl From<&PluginError> for RpcError {
    fn from(err: &PluginError) -> Self {
        match err {
            PluginError::StaleHandle(msg) => Self::stale_handle(msg.clone()),
            PluginError::NotInitialized => {
                Self::new(error_codes::NOT_INITIALIZED, err.to_string())
            }
            PluginError::AlreadyInitialized => {
                Self::new(error_codes::ALREADY_INITIALIZED, err.to_string())
            }
            PluginError::Unsupported(msg) => Self::new(error_codes::UNSUPPORTED, msg.clone()),
            PluginError::InvalidParams(msg) => Self::invalid_params(msg.clone()),
            PluginError::Json(e) => Self::invalid_params(e.to_string()),
            PluginError::Remote { code, message } => Self::new(*code, message.clone()),
            PluginError::Failed(msg) => Self::new(error_codes::PLUGIN_ERROR, msg.clone()),
            other => Self::internal_error(other.to_string()),
        }
    }
}

/// Parameters for `Plugin.Initialize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Name the host registered the plugin under
    pub plugin: String,
    /// Version of the host
    pub host_version: String,
    /// Manifest defaults merged with user configuration
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// Parameters for `Plugin.ExecuteCommand` and `Host.ExecuteCommand`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCommandParams {
    pub name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Parameters for `Plugin.GetCompletions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionsParams {
    pub command: String,
    pub prefix: String,
}

/// Parameters for `Plugin.HandleHook` and `Host.TriggerHook`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookParams {
    pub event: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Parameters for `Host.AddHook`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventParams {
    pub event: String,
}

/// Parameters for buffer-scoped role callbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferParams {
    pub buffer: HandleId,
}

/// Parameters for `Plugin.OnFileOpen` / `Plugin.OnFileSave`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEventParams {
    pub buffer: HandleId,
    pub filename: String,
}

/// Parameters for `Plugin.OnBufferChange`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferChangeParams {
    pub buffer: HandleId,
    pub change: ChangeSpec,
}

/// Parameters for `Plugin.OnCursorMove`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorMoveParams {
    pub buffer: HandleId,
    pub old_pos: usize,
    pub new_pos: usize,
}

/// Parameters carrying a single status or message string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParams {
    pub message: String,
}

/// Parameters for `Host.SetMajorMode` / `Host.ToggleMinorMode`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeParams {
    pub buffer: String,
    pub mode: String,
}

/// Parameters naming a buffer or option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameParams {
    pub name: String,
}

/// Parameters for `Host.OpenFile`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathParams {
    pub path: String,
}

/// Parameters for `Host.SetOption`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOptionParams {
    pub name: String,
    pub value: serde_json::Value,
}

/// Parameters for accessors that only need the handle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleParams {
    pub handle: HandleId,
}

/// Parameters for `Buffer.SetContent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContentParams {
    pub handle: HandleId,
    pub content: String,
}

/// Parameters for `Buffer.InsertAt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertParams {
    pub handle: HandleId,
    pub pos: usize,
    pub text: String,
}

/// Parameters for `Buffer.DeleteRange`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeParams {
    pub handle: HandleId,
    pub start: usize,
    pub end: usize,
}

/// Parameters for `Buffer.SetCursorPosition` / `Window.SetScrollOffset`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionParams {
    pub handle: HandleId,
    pub pos: usize,
}

/// Parameters for `Window.SetBuffer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBufferParams {
    pub window: HandleId,
    pub buffer: HandleId,
}
