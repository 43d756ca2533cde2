//! Plugin traits defining the contract between plugins and the host
//!
//! Every plugin implements [`Plugin`]. The role traits are optional; a plugin
//! opts into one by implementing it and returning `Some(self)` from the
//! matching `as_*` accessor.

use async_trait::async_trait;

use crate::error::{PluginError, Result};
use crate::host::{BufferHandle, HostClient};
use crate::types::*;

/// Base trait all plugins must implement
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Plugin name
    fn name(&self) -> &str;

    /// Plugin version
    fn version(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str {
        ""
    }

    /// Called exactly once before any operational call.
    ///
    /// `host` stays valid for the life of the connection; plugins usually keep
    /// a clone of it.
    async fn initialize(&self, ctx: InitContext, host: HostClient) -> Result<()>;

    /// Called once before the host tears the connection down
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Commands this plugin contributes
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Major modes this plugin contributes
    fn major_modes(&self) -> Vec<MajorModeSpec> {
        Vec::new()
    }

    /// Minor modes this plugin contributes
    fn minor_modes(&self) -> Vec<MinorModeSpec> {
        Vec::new()
    }

    /// Global key bindings this plugin contributes
    fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        Vec::new()
    }

    /// Handle a hook event the plugin subscribed to with `HostClient::add_hook`
    async fn handle_hook(&self, event: &str, _args: Vec<serde_json::Value>) -> Result<()> {
        Err(PluginError::unsupported(format!("hook '{event}'")))
    }

    fn as_command(&self) -> Option<&dyn CommandPlugin> {
        None
    }

    fn as_major_mode(&self) -> Option<&dyn MajorModePlugin> {
        None
    }

    fn as_minor_mode(&self) -> Option<&dyn MinorModePlugin> {
        None
    }
}

/// Plugin that executes its own commands
#[async_trait]
pub trait CommandPlugin: Send + Sync {
    /// Run one of the plugin's commands
    async fn execute_command(&self, name: &str, args: Vec<serde_json::Value>) -> Result<()>;

    /// Completion candidates for a command argument
    async fn completions(&self, _command: &str, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Plugin that drives a major mode
#[async_trait]
pub trait MajorModePlugin: Send + Sync {
    async fn on_activate(&self, buffer: BufferHandle) -> Result<()>;

    async fn on_deactivate(&self, buffer: BufferHandle) -> Result<()>;

    async fn on_file_open(&self, _buffer: BufferHandle, _filename: &str) -> Result<()> {
        Ok(())
    }

    async fn on_file_save(&self, _buffer: BufferHandle, _filename: &str) -> Result<()> {
        Ok(())
    }
}

/// Plugin that drives a minor mode
#[async_trait]
pub trait MinorModePlugin: Send + Sync {
    async fn enable(&self, buffer: BufferHandle) -> Result<()>;

    async fn disable(&self, buffer: BufferHandle) -> Result<()>;

    async fn is_enabled(&self, buffer: BufferHandle) -> Result<bool>;

    async fn on_buffer_change(&self, _buffer: BufferHandle, _change: ChangeSpec) -> Result<()> {
        Ok(())
    }

    async fn on_cursor_move(&self, _buffer: BufferHandle, _old_pos: usize, _new_pos: usize) -> Result<()> {
        Ok(())
    }
}
