//! Host capability bridge
//!
//! Serves the requests a plugin makes into the host. One bridge exists per
//! plugin connection and is bound to that plugin's name. Buffers and windows
//! leave the host only as handles from the bridge's own arena.

use async_trait::async_trait;
use gmacs_plugin_sdk::protocol::methods::{buffer as b, host as h, window as w};
use gmacs_plugin_sdk::protocol::*;
use gmacs_plugin_sdk::rpc::RequestHandler;
use gmacs_plugin_sdk::HandleId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, warn};

use crate::editor::{Buffer, Editor, Window};
use crate::error::{HostError, Result};
use crate::plugins::container::{InFlight, SERVING};
use crate::plugins::handles::HandleTable;
use crate::plugins::hooks::HookFailure;

/// Plugin-level routing the bridge delegates to the manager
#[async_trait]
pub trait PluginRouter: Send + Sync {
    /// Subscribe `plugin` to `event`
    async fn add_hook(&self, plugin: &str, event: &str) -> Result<()>;

    /// Fire `event` for every subscriber, collecting failures
    async fn trigger_hook(&self, event: &str, args: Vec<Value>) -> Vec<HookFailure>;

    /// Run a plugin-registered command; `None` if no plugin owns `name`
    async fn route_command(&self, name: &str, args: Vec<Value>) -> Option<Result<()>>;
}

/// Capability bridge for one plugin
pub struct HostBridge {
    plugin: String,
    editor: Arc<dyn Editor>,
    handles: Mutex<HandleTable>,
    router: Weak<dyn PluginRouter>,
    /// Host call the plugin is answering, shared with its client
    in_flight: Arc<InFlight>,
}

impl HostBridge {
    pub fn new(
        plugin: impl Into<String>,
        editor: Arc<dyn Editor>,
        router: Weak<dyn PluginRouter>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            editor,
            handles: Mutex::new(HandleTable::new()),
            router,
            in_flight,
        }
    }

    /// Plugin this bridge serves
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Handle under which this plugin sees `buffer`
    pub fn issue_buffer(&self, buffer: &Arc<dyn Buffer>) -> HandleId {
        self.handles().issue_buffer(buffer)
    }

    /// Handle under which this plugin sees `window`
    pub fn issue_window(&self, window: &Arc<dyn Window>) -> HandleId {
        self.handles().issue_window(window)
    }

    /// Invalidate every handle issued to the plugin
    pub fn clear_handles(&self) {
        self.handles().clear();
    }

    fn handles(&self) -> MutexGuard<'_, HandleTable> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn buffer(&self, id: HandleId) -> Result<Arc<dyn Buffer>> {
        self.handles().buffer(id)
    }

    fn window(&self, id: HandleId) -> Result<Arc<dyn Window>> {
        self.handles().window(id)
    }

    fn router(&self) -> Option<Arc<dyn PluginRouter>> {
        self.router.upgrade()
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        let editor = &self.editor;
        match method {
            h::SET_STATUS => {
                let p: MessageParams = decode(params)?;
                editor.set_status(&p.message);
                unit()
            }
            h::SHOW_MESSAGE => {
                let p: MessageParams = decode(params)?;
                editor.show_message(&p.message);
                unit()
            }
            h::EXECUTE_COMMAND => {
                let p: ExecuteCommandParams = decode(params)?;
                let routed = match self.router() {
                    Some(router) => router.route_command(&p.name, p.args.clone()).await,
                    None => None,
                };
                match routed {
                    Some(result) => result?,
                    None => editor.execute_command(&p.name, &p.args)?,
                }
                unit()
            }
            h::SET_MAJOR_MODE => {
                let p: ModeParams = decode(params)?;
                editor.set_major_mode(&p.buffer, &p.mode)?;
                unit()
            }
            h::TOGGLE_MINOR_MODE => {
                let p: ModeParams = decode(params)?;
                editor.toggle_minor_mode(&p.buffer, &p.mode)?;
                unit()
            }
            h::ADD_HOOK => {
                let p: EventParams = decode(params)?;
                let router = self
                    .router()
                    .ok_or_else(|| HostError::InvalidState("plugin manager is gone".into()))?;
                router.add_hook(&self.plugin, &p.event).await?;
                unit()
            }
            h::TRIGGER_HOOK => {
                let p: HookParams = decode(params)?;
                if let Some(router) = self.router() {
                    for failure in router.trigger_hook(&p.event, p.args).await {
                        warn!(
                            plugin = %self.plugin,
                            event = %p.event,
                            "hook handler in {} failed: {}",
                            failure.plugin,
                            failure.error
                        );
                    }
                }
                unit()
            }
            h::CREATE_BUFFER => {
                let p: NameParams = decode(params)?;
                let buffer = editor.create_buffer(&p.name)?;
                reply(self.issue_buffer(&buffer))
            }
            h::FIND_BUFFER => {
                let p: NameParams = decode(params)?;
                let id = editor.find_buffer(&p.name).map(|buf| self.issue_buffer(&buf));
                reply(id)
            }
            h::SWITCH_TO_BUFFER => {
                let p: NameParams = decode(params)?;
                editor.switch_to_buffer(&p.name)?;
                unit()
            }
            h::OPEN_FILE => {
                let p: PathParams = decode(params)?;
                let buffer = editor.open_file(&p.path)?;
                reply(self.issue_buffer(&buffer))
            }
            h::SAVE_BUFFER => {
                let p: NameParams = decode(params)?;
                editor.save_buffer(&p.name)?;
                unit()
            }
            h::GET_OPTION => {
                let p: NameParams = decode(params)?;
                reply(editor.get_option(&p.name))
            }
            h::SET_OPTION => {
                let p: SetOptionParams = decode(params)?;
                editor.set_option(&p.name, p.value)?;
                unit()
            }
            h::GET_CURRENT_BUFFER => {
                reply(editor.current_buffer().map(|buf| self.issue_buffer(&buf)))
            }
            h::GET_CURRENT_WINDOW => {
                reply(editor.current_window().map(|win| self.issue_window(&win)))
            }

            b::NAME => reply(self.buffer(handle(params)?)?.name()),
            b::CONTENT => reply(self.buffer(handle(params)?)?.content()),
            b::SET_CONTENT => {
                let p: SetContentParams = decode(params)?;
                self.buffer(p.handle)?.set_content(&p.content);
                unit()
            }
            b::INSERT_AT => {
                let p: InsertParams = decode(params)?;
                self.buffer(p.handle)?.insert_at(p.pos, &p.text)?;
                unit()
            }
            b::DELETE_RANGE => {
                let p: RangeParams = decode(params)?;
                self.buffer(p.handle)?.delete_range(p.start, p.end)?;
                unit()
            }
            b::CURSOR_POSITION => reply(self.buffer(handle(params)?)?.cursor_position()),
            b::SET_CURSOR_POSITION => {
                let p: PositionParams = decode(params)?;
                self.buffer(p.handle)?.set_cursor_position(p.pos)?;
                unit()
            }
            b::MARK_DIRTY => {
                self.buffer(handle(params)?)?.mark_dirty();
                unit()
            }
            b::IS_DIRTY => reply(self.buffer(handle(params)?)?.is_dirty()),
            b::FILENAME => reply(self.buffer(handle(params)?)?.filename()),

            w::BUFFER => {
                let window = self.window(handle(params)?)?;
                reply(window.buffer().map(|buf| self.issue_buffer(&buf)))
            }
            w::SET_BUFFER => {
                let p: SetBufferParams = decode(params)?;
                let window = self.window(p.window)?;
                let buffer = self.buffer(p.buffer)?;
                window.set_buffer(buffer);
                unit()
            }
            w::WIDTH => reply(self.window(handle(params)?)?.width()),
            w::HEIGHT => reply(self.window(handle(params)?)?.height()),
            w::SCROLL_OFFSET => reply(self.window(handle(params)?)?.scroll_offset()),
            w::SET_SCROLL_OFFSET => {
                let p: PositionParams = decode(params)?;
                self.window(p.handle)?.set_scroll_offset(p.pos);
                unit()
            }

            other => Err(HostError::RemoteCall {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
            }),
        }
    }
}

#[async_trait]
impl RequestHandler for HostBridge {
    async fn handle(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        debug!(plugin = %self.plugin, method, "plugin request");
        let chain = self.in_flight.chain_for(&self.plugin);
        SERVING
            .scope(chain, self.dispatch(method, params))
            .await
            .map_err(|e| to_rpc_error(&e))
    }
}

/// Wire form of a host-side failure
pub fn to_rpc_error(err: &HostError) -> RpcError {
    match err {
        HostError::StaleHandle(msg) => RpcError::stale_handle(msg.clone()),
        HostError::Json(e) => RpcError::invalid_params(e.to_string()),
        HostError::RemoteCall { code, message } => RpcError::new(*code, message.clone()),
        other => RpcError::host_error(other.to_string()),
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T> {
    Ok(serde_json::from_value(params)?)
}

fn handle(params: Value) -> Result<HandleId> {
    Ok(decode::<HandleParams>(params)?.handle)
}

fn reply<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn unit() -> Result<Value> {
    Ok(Value::Null)
}
