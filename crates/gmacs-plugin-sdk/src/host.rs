//! Host capabilities as seen from a plugin
//!
//! Nothing here holds editor state. Buffers and windows are opaque handles;
//! every read or write is a call into the host, resolved against the live
//! object the handle names.

use serde_json::Value;

use crate::error::Result;
use crate::protocol::methods::{buffer, host, window};
use crate::protocol::*;
use crate::rpc::RpcPeer;
use crate::types::HandleId;

/// Client for the host capability bridge, bound to one connection
#[derive(Clone)]
pub struct HostClient {
    peer: RpcPeer,
}

impl HostClient {
    pub fn new(peer: RpcPeer) -> Self {
        Self { peer }
    }

    /// Underlying connection
    pub fn peer(&self) -> &RpcPeer {
        &self.peer
    }

    /// Show a message in the status line
    pub async fn set_status(&self, message: impl Into<String>) -> Result<()> {
        self.peer
            .call(host::SET_STATUS, MessageParams { message: message.into() })
            .await
    }

    /// Show a message to the user
    pub async fn show_message(&self, message: impl Into<String>) -> Result<()> {
        self.peer
            .call(host::SHOW_MESSAGE, MessageParams { message: message.into() })
            .await
    }

    /// Run a command by name, whether built in or contributed by a plugin
    pub async fn execute_command(&self, name: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.peer
            .call(
                host::EXECUTE_COMMAND,
                ExecuteCommandParams {
                    name: name.into(),
                    args,
                },
            )
            .await
    }

    /// Set the major mode of a buffer
    pub async fn set_major_mode(&self, buffer: &str, mode: &str) -> Result<()> {
        self.peer
            .call(
                host::SET_MAJOR_MODE,
                ModeParams {
                    buffer: buffer.to_string(),
                    mode: mode.to_string(),
                },
            )
            .await
    }

    /// Toggle a minor mode in a buffer
    pub async fn toggle_minor_mode(&self, buffer: &str, mode: &str) -> Result<()> {
        self.peer
            .call(
                host::TOGGLE_MINOR_MODE,
                ModeParams {
                    buffer: buffer.to_string(),
                    mode: mode.to_string(),
                },
            )
            .await
    }

    /// Subscribe to a hook event; the host answers with `Plugin.HandleHook`
    pub async fn add_hook(&self, event: impl Into<String>) -> Result<()> {
        self.peer
            .call(host::ADD_HOOK, EventParams { event: event.into() })
            .await
    }

    /// Fire a hook event for every subscriber
    pub async fn trigger_hook(&self, event: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.peer
            .call(
                host::TRIGGER_HOOK,
                HookParams {
                    event: event.into(),
                    args,
                },
            )
            .await
    }

    pub async fn create_buffer(&self, name: impl Into<String>) -> Result<BufferHandle> {
        let id: HandleId = self
            .peer
            .call(host::CREATE_BUFFER, NameParams { name: name.into() })
            .await?;
        Ok(self.buffer(id))
    }

    pub async fn find_buffer(&self, name: impl Into<String>) -> Result<Option<BufferHandle>> {
        let id: Option<HandleId> = self
            .peer
            .call(host::FIND_BUFFER, NameParams { name: name.into() })
            .await?;
        Ok(id.map(|id| self.buffer(id)))
    }

    pub async fn switch_to_buffer(&self, name: impl Into<String>) -> Result<()> {
        self.peer
            .call(host::SWITCH_TO_BUFFER, NameParams { name: name.into() })
            .await
    }

    /// Open a file into a buffer
    pub async fn open_file(&self, path: impl Into<String>) -> Result<BufferHandle> {
        let id: HandleId = self
            .peer
            .call(host::OPEN_FILE, PathParams { path: path.into() })
            .await?;
        Ok(self.buffer(id))
    }

    /// Save the named buffer to its file
    pub async fn save_buffer(&self, name: impl Into<String>) -> Result<()> {
        self.peer
            .call(host::SAVE_BUFFER, NameParams { name: name.into() })
            .await
    }

    pub async fn get_option(&self, name: impl Into<String>) -> Result<Option<Value>> {
        self.peer
            .call(host::GET_OPTION, NameParams { name: name.into() })
            .await
    }

    pub async fn set_option(&self, name: impl Into<String>, value: Value) -> Result<()> {
        self.peer
            .call(
                host::SET_OPTION,
                SetOptionParams {
                    name: name.into(),
                    value,
                },
            )
            .await
    }

    pub async fn current_buffer(&self) -> Result<Option<BufferHandle>> {
        let id: Option<HandleId> = self.peer.call(host::GET_CURRENT_BUFFER, Value::Null).await?;
        Ok(id.map(|id| self.buffer(id)))
    }

    pub async fn current_window(&self) -> Result<Option<WindowHandle>> {
        let id: Option<HandleId> = self.peer.call(host::GET_CURRENT_WINDOW, Value::Null).await?;
        Ok(id.map(|id| self.window(id)))
    }

    /// Wrap a buffer handle the host sent us
    pub fn buffer(&self, id: HandleId) -> BufferHandle {
        BufferHandle {
            id,
            peer: self.peer.clone(),
        }
    }

    /// Wrap a window handle the host sent us
    pub fn window(&self, id: HandleId) -> WindowHandle {
        WindowHandle {
            id,
            peer: self.peer.clone(),
        }
    }
}

/// Remote handle to a host buffer.
///
/// Calls fail with `PluginError::StaleHandle` once the host destroys the
/// buffer.
#[derive(Clone)]
pub struct BufferHandle {
    id: HandleId,
    peer: RpcPeer,
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BufferHandle").field(&self.id).finish()
    }
}

impl BufferHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    fn params(&self) -> HandleParams {
        HandleParams { handle: self.id }
    }

    pub async fn name(&self) -> Result<String> {
        self.peer.call(buffer::NAME, self.params()).await
    }

    pub async fn content(&self) -> Result<String> {
        self.peer.call(buffer::CONTENT, self.params()).await
    }

    pub async fn set_content(&self, content: impl Into<String>) -> Result<()> {
        self.peer
            .call(
                buffer::SET_CONTENT,
                SetContentParams {
                    handle: self.id,
                    content: content.into(),
                },
            )
            .await
    }

    pub async fn insert_at(&self, pos: usize, text: impl Into<String>) -> Result<()> {
        self.peer
            .call(
                buffer::INSERT_AT,
                InsertParams {
                    handle: self.id,
                    pos,
                    text: text.into(),
                },
            )
            .await
    }

    pub async fn delete_range(&self, start: usize, end: usize) -> Result<()> {
        self.peer
            .call(
                buffer::DELETE_RANGE,
                RangeParams {
                    handle: self.id,
                    start,
                    end,
                },
            )
            .await
    }

    pub async fn cursor_position(&self) -> Result<usize> {
        self.peer.call(buffer::CURSOR_POSITION, self.params()).await
    }

    pub async fn set_cursor_position(&self, pos: usize) -> Result<()> {
        self.peer
            .call(
                buffer::SET_CURSOR_POSITION,
                PositionParams { handle: self.id, pos },
            )
            .await
    }

    pub async fn mark_dirty(&self) -> Result<()> {
        self.peer.call(buffer::MARK_DIRTY, self.params()).await
    }

    pub async fn is_dirty(&self) -> Result<bool> {
        self.peer.call(buffer::IS_DIRTY, self.params()).await
    }

    /// File backing the buffer, if any
    pub async fn filename(&self) -> Result<Option<String>> {
        self.peer.call(buffer::FILENAME, self.params()).await
    }
}

/// Remote handle to a host window
#[derive(Clone)]
pub struct WindowHandle {
    id: HandleId,
    peer: RpcPeer,
}

impl std::fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WindowHandle").field(&self.id).finish()
    }
}

impl WindowHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    fn params(&self) -> HandleParams {
        HandleParams { handle: self.id }
    }

    /// Buffer shown in the window
    pub async fn buffer(&self) -> Result<Option<BufferHandle>> {
        let id: Option<HandleId> = self.peer.call(window::BUFFER, self.params()).await?;
        Ok(id.map(|id| BufferHandle {
            id,
            peer: self.peer.clone(),
        }))
    }

    pub async fn set_buffer(&self, buffer: &BufferHandle) -> Result<()> {
        self.peer
            .call(
                window::SET_BUFFER,
                SetBufferParams {
                    window: self.id,
                    buffer: buffer.id,
                },
            )
            .await
    }

    pub async fn width(&self) -> Result<usize> {
        self.peer.call(window::WIDTH, self.params()).await
    }

    pub async fn height(&self) -> Result<usize> {
        self.peer.call(window::HEIGHT, self.params()).await
    }

    pub async fn scroll_offset(&self) -> Result<usize> {
        self.peer.call(window::SCROLL_OFFSET, self.params()).await
    }

    pub async fn set_scroll_offset(&self, offset: usize) -> Result<()> {
        self.peer
            .call(
                window::SET_SCROLL_OFFSET,
                PositionParams {
                    handle: self.id,
                    pos: offset,
                },
            )
            .await
    }
}
