//! Host-side proxy for one plugin connection
//!
//! Every call the host makes into a plugin goes through [`PluginClient`],
//! which serializes calls per plugin and applies the configured timeouts.

use gmacs_plugin_sdk::protocol::methods::plugin as m;
use gmacs_plugin_sdk::protocol::*;
use gmacs_plugin_sdk::rpc::RpcPeer;
use gmacs_plugin_sdk::{
    ChangeSpec, CommandSpec, HandleId, KeyBindingSpec, MajorModeSpec, MinorModeSpec,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::TimeoutConfig;
use crate::error::Result;
use crate::plugins::spec_registry::PluginSpecs;

/// Plugins with a host call in flight that the current work is nested in,
/// outermost first
pub(crate) type CallChain = Arc<Vec<String>>;

tokio::task_local! {
    /// Call chain of the plugin request the current task is serving
    pub(crate) static SERVING: CallChain;
}

/// Call chain of the gated host call a plugin is answering right now
///
/// Shared between a plugin's [`PluginClient`] and its bridge. The gate allows
/// one such call at a time, so a request arriving from the plugin meanwhile
/// is treated as part of it.
#[derive(Debug, Default)]
pub struct InFlight(std::sync::Mutex<Option<CallChain>>);

impl InFlight {
    /// Chain a request from `plugin` runs under
    pub(crate) fn chain_for(&self, plugin: &str) -> CallChain {
        self.slot()
            .clone()
            .unwrap_or_else(|| Arc::new(vec![plugin.to_string()]))
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CallChain>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the in-flight chain however the call ends
struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.0.slot() = None;
    }
}

/// Typed calls into a plugin
pub struct PluginClient {
    name: String,
    peer: RpcPeer,
    /// One outstanding host call per plugin
    gate: Mutex<()>,
    in_flight: Arc<InFlight>,
    timeouts: TimeoutConfig,
}

impl PluginClient {
    pub fn new(name: impl Into<String>, peer: RpcPeer, timeouts: TimeoutConfig) -> Self {
        Self {
            name: name.into(),
            peer,
            gate: Mutex::new(()),
            in_flight: Arc::default(),
            timeouts,
        }
    }

    /// In-flight call tracking to hand to this plugin's bridge
    pub fn in_flight(&self) -> Arc<InFlight> {
        self.in_flight.clone()
    }

    /// Name the host registered the plugin under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying connection
    pub fn peer(&self) -> &RpcPeer {
        &self.peer
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R> {
        // A call nested in a call this plugin is already answering, directly
        // or through other plugins, must not wait for that call's gate
        let outer = SERVING.try_with(Arc::clone).ok();
        if outer
            .as_ref()
            .is_some_and(|chain| chain.iter().any(|p| p == &self.name))
        {
            debug!(plugin = %self.name, method, "reentrant call");
            return Ok(self.peer.call_with_timeout(method, params, timeout).await?);
        }

        let _permit = self.gate.lock().await;
        let mut chain = outer.map(|c| c.as_ref().clone()).unwrap_or_default();
        chain.push(self.name.clone());
        *self.in_flight.slot() = Some(Arc::new(chain));
        let _in_flight = InFlightGuard(&*self.in_flight);

        Ok(self.peer.call_with_timeout(method, params, timeout).await?)
    }

    pub async fn plugin_name(&self) -> Result<String> {
        self.call(m::NAME, Value::Null, self.timeouts.metadata()).await
    }

    pub async fn version(&self) -> Result<String> {
        self.call(m::VERSION, Value::Null, self.timeouts.metadata()).await
    }

    pub async fn description(&self) -> Result<String> {
        self.call(m::DESCRIPTION, Value::Null, self.timeouts.metadata())
            .await
    }

    pub async fn initialize(&self, params: InitializeParams) -> Result<()> {
        self.call(m::INITIALIZE, params, self.timeouts.call()).await
    }

    /// Bounded by the cleanup grace period rather than the call timeout
    pub async fn cleanup(&self) -> Result<()> {
        self.call(m::CLEANUP, Value::Null, self.timeouts.cleanup_grace())
            .await
    }

    /// Query all four spec lists
    pub async fn specs(&self) -> Result<PluginSpecs> {
        let call = self.timeouts.call();
        let commands: Vec<CommandSpec> = self.call(m::GET_COMMANDS, Value::Null, call).await?;
        let major_modes: Vec<MajorModeSpec> =
            self.call(m::GET_MAJOR_MODES, Value::Null, call).await?;
        let minor_modes: Vec<MinorModeSpec> =
            self.call(m::GET_MINOR_MODES, Value::Null, call).await?;
        let key_bindings: Vec<KeyBindingSpec> =
            self.call(m::GET_KEY_BINDINGS, Value::Null, call).await?;
        Ok(PluginSpecs {
            commands,
            major_modes,
            minor_modes,
            key_bindings,
        })
    }

    pub async fn handle_hook(&self, event: &str, args: Vec<Value>) -> Result<()> {
        self.call(
            m::HANDLE_HOOK,
            HookParams {
                event: event.to_string(),
                args,
            },
            self.timeouts.call(),
        )
        .await
    }

    pub async fn execute_command(&self, name: &str, args: Vec<Value>) -> Result<()> {
        self.call(
            m::EXECUTE_COMMAND,
            ExecuteCommandParams {
                name: name.to_string(),
                args,
            },
            self.timeouts.call(),
        )
        .await
    }

    pub async fn completions(&self, command: &str, prefix: &str) -> Result<Vec<String>> {
        self.call(
            m::GET_COMPLETIONS,
            CompletionsParams {
                command: command.to_string(),
                prefix: prefix.to_string(),
            },
            self.timeouts.call(),
        )
        .await
    }

    pub async fn on_activate(&self, buffer: HandleId) -> Result<()> {
        self.call(m::ON_ACTIVATE, BufferParams { buffer }, self.timeouts.call())
            .await
    }

    pub async fn on_deactivate(&self, buffer: HandleId) -> Result<()> {
        self.call(m::ON_DEACTIVATE, BufferParams { buffer }, self.timeouts.call())
            .await
    }

    pub async fn on_file_open(&self, buffer: HandleId, filename: &str) -> Result<()> {
        self.call(
            m::ON_FILE_OPEN,
            FileEventParams {
                buffer,
                filename: filename.to_string(),
            },
            self.timeouts.call(),
        )
        .await
    }

    pub async fn on_file_save(&self, buffer: HandleId, filename: &str) -> Result<()> {
        self.call(
            m::ON_FILE_SAVE,
            FileEventParams {
                buffer,
                filename: filename.to_string(),
            },
            self.timeouts.call(),
        )
        .await
    }

    pub async fn enable(&self, buffer: HandleId) -> Result<()> {
        self.call(m::ENABLE, BufferParams { buffer }, self.timeouts.call())
            .await
    }

    pub async fn disable(&self, buffer: HandleId) -> Result<()> {
        self.call(m::DISABLE, BufferParams { buffer }, self.timeouts.call())
            .await
    }

    pub async fn is_enabled(&self, buffer: HandleId) -> Result<bool> {
        self.call(m::IS_ENABLED, BufferParams { buffer }, self.timeouts.call())
            .await
    }

    pub async fn on_buffer_change(&self, buffer: HandleId, change: ChangeSpec) -> Result<()> {
        self.call(
            m::ON_BUFFER_CHANGE,
            BufferChangeParams { buffer, change },
            self.timeouts.call(),
        )
        .await
    }

    pub async fn on_cursor_move(&self, buffer: HandleId, old_pos: usize, new_pos: usize) -> Result<()> {
        self.call(
            m::ON_CURSOR_MOVE,
            CursorMoveParams {
                buffer,
                old_pos,
                new_pos,
            },
            self.timeouts.call(),
        )
        .await
    }

    /// Close the connection
    pub fn close(&self) {
        self.peer.close();
    }
}
