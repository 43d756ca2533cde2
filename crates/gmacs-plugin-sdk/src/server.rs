//! Plugin-side request dispatch
//!
//! Turns host requests back into ordinary calls on a [`Plugin`]
//! implementation.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::host::HostClient;
use crate::protocol::methods::plugin as m;
use crate::protocol::*;
use crate::rpc::RequestHandler;
use crate::traits::Plugin;
use crate::types::InitContext;

/// Serves the plugin contract for one connection
pub struct PluginDispatcher<P: Plugin> {
    plugin: Arc<P>,
    host: HostClient,
    initialized: AtomicBool,
}

impl<P: Plugin> PluginDispatcher<P> {
    pub fn new(plugin: Arc<P>, host: HostClient) -> Self {
        Self {
            plugin,
            host,
            initialized: AtomicBool::new(false),
        }
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PluginError::NotInitialized)
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        let plugin = &self.plugin;
        match method {
            m::NAME => reply(plugin.name()),
            m::VERSION => reply(plugin.version()),
            m::DESCRIPTION => reply(plugin.description()),

            m::INITIALIZE => {
                let params: InitializeParams = decode(params)?;
                if self.initialized.swap(true, Ordering::SeqCst) {
                    return Err(PluginError::AlreadyInitialized);
                }
                let ctx = InitContext {
                    plugin: params.plugin,
                    host_version: params.host_version,
                    config: params.config,
                };
                if let Err(e) = plugin.initialize(ctx, self.host.clone()).await {
                    self.initialized.store(false, Ordering::SeqCst);
                    return Err(e);
                }
                reply(())
            }
            m::CLEANUP => {
                self.require_initialized()?;
                let result = plugin.cleanup().await;
                self.initialized.store(false, Ordering::SeqCst);
                result?;
                reply(())
            }

            m::GET_COMMANDS => {
                self.require_initialized()?;
                reply(plugin.commands())
            }
            m::GET_MAJOR_MODES => {
                self.require_initialized()?;
                reply(plugin.major_modes())
            }
            m::GET_MINOR_MODES => {
                self.require_initialized()?;
                reply(plugin.minor_modes())
            }
            m::GET_KEY_BINDINGS => {
                self.require_initialized()?;
                reply(plugin.key_bindings())
            }
            m::HANDLE_HOOK => {
                self.require_initialized()?;
                let params: HookParams = decode(params)?;
                plugin.handle_hook(&params.event, params.args).await?;
                reply(())
            }

            m::EXECUTE_COMMAND | m::GET_COMPLETIONS => {
                self.require_initialized()?;
                let role = plugin
                    .as_command()
                    .ok_or_else(|| PluginError::unsupported("command role"))?;
                if method == m::EXECUTE_COMMAND {
                    let params: ExecuteCommandParams = decode(params)?;
                    role.execute_command(&params.name, params.args).await?;
                    reply(())
                } else {
                    let params: CompletionsParams = decode(params)?;
                    reply(role.completions(&params.command, &params.prefix).await?)
                }
            }

            m::ON_ACTIVATE | m::ON_DEACTIVATE | m::ON_FILE_OPEN | m::ON_FILE_SAVE => {
                self.require_initialized()?;
                let role = plugin
                    .as_major_mode()
                    .ok_or_else(|| PluginError::unsupported("major mode role"))?;
                match method {
                    m::ON_ACTIVATE => {
                        let params: BufferParams = decode(params)?;
                        role.on_activate(self.host.buffer(params.buffer)).await?;
                    }
                    m::ON_DEACTIVATE => {
                        let params: BufferParams = decode(params)?;
                        role.on_deactivate(self.host.buffer(params.buffer)).await?;
                    }
                    m::ON_FILE_OPEN => {
                        let params: FileEventParams = decode(params)?;
                        role.on_file_open(self.host.buffer(params.buffer), &params.filename)
                            .await?;
                    }
                    _ => {
                        let params: FileEventParams = decode(params)?;
                        role.on_file_save(self.host.buffer(params.buffer), &params.filename)
                            .await?;
                    }
                }
                reply(())
            }

            m::ENABLE | m::DISABLE | m::IS_ENABLED | m::ON_BUFFER_CHANGE | m::ON_CURSOR_MOVE => {
                self.require_initialized()?;
                let role = plugin
                    .as_minor_mode()
                    .ok_or_else(|| PluginError::unsupported("minor mode role"))?;
                match method {
                    m::ENABLE => {
                        let params: BufferParams = decode(params)?;
                        role.enable(self.host.buffer(params.buffer)).await?;
                        reply(())
                    }
                    m::DISABLE => {
                        let params: BufferParams = decode(params)?;
                        role.disable(self.host.buffer(params.buffer)).await?;
                        reply(())
                    }
                    m::IS_ENABLED => {
                        let params: BufferParams = decode(params)?;
                        reply(role.is_enabled(self.host.buffer(params.buffer)).await?)
                    }
                    m::ON_BUFFER_CHANGE => {
                        let params: BufferChangeParams = decode(params)?;
                        role.on_buffer_change(self.host.buffer(params.buffer), params.change)
                            .await?;
                        reply(())
                    }
                    _ => {
                        let params: CursorMoveParams = decode(params)?;
                        role.on_cursor_move(
                            self.host.buffer(params.buffer),
                            params.old_pos,
                            params.new_pos,
                        )
                        .await?;
                        reply(())
                    }
                }
            }

            other => Err(PluginError::Remote {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
            }),
        }
    }
}

#[async_trait]
impl<P: Plugin> RequestHandler for PluginDispatcher<P> {
    async fn handle(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        debug!(plugin = self.plugin.name(), method, "handling host request");
        self.dispatch(method, params)
            .await
            .map_err(|e| RpcError::from(&e))
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| PluginError::InvalidParams(e.to_string()))
}

fn reply<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
