//! Capability contracts the editor exposes to plugins
//!
//! The host embeds a plugin manager by implementing these traits over its
//! own buffer and window types. The bridge only ever calls through them, so
//! buffer and window state stays owned by the editor and is guarded by
//! whatever locking the editor already uses.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Failures the editor reports back through a capability call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditorError {
    #[error("no buffer named '{0}'")]
    BufferNotFound(String),

    #[error("buffer '{0}' already exists")]
    BufferExists(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    #[error("range {start}..{end} is outside a buffer of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("{0}")]
    Failed(String),
}

/// Result type for editor capability calls
pub type EditorResult<T> = std::result::Result<T, EditorError>;

/// Editor-wide operations
pub trait Editor: Send + Sync + 'static {
    fn set_status(&self, message: &str);

    fn show_message(&self, message: &str);

    /// Run a built-in command. Plugin commands never reach this.
    fn execute_command(&self, name: &str, args: &[Value]) -> EditorResult<()>;

    fn set_major_mode(&self, buffer: &str, mode: &str) -> EditorResult<()>;

    fn toggle_minor_mode(&self, buffer: &str, mode: &str) -> EditorResult<()>;

    fn create_buffer(&self, name: &str) -> EditorResult<Arc<dyn Buffer>>;

    fn find_buffer(&self, name: &str) -> Option<Arc<dyn Buffer>>;

    fn switch_to_buffer(&self, name: &str) -> EditorResult<()>;

    fn open_file(&self, path: &str) -> EditorResult<Arc<dyn Buffer>>;

    fn save_buffer(&self, name: &str) -> EditorResult<()>;

    fn get_option(&self, name: &str) -> Option<Value>;

    fn set_option(&self, name: &str, value: Value) -> EditorResult<()>;

    fn current_buffer(&self) -> Option<Arc<dyn Buffer>>;

    fn current_window(&self) -> Option<Arc<dyn Window>>;
}

/// A live editor buffer
pub trait Buffer: Send + Sync + 'static {
    fn name(&self) -> String;

    fn content(&self) -> String;

    fn set_content(&self, content: &str);

    fn insert_at(&self, pos: usize, text: &str) -> EditorResult<()>;

    fn delete_range(&self, start: usize, end: usize) -> EditorResult<()>;

    fn cursor_position(&self) -> usize;

    fn set_cursor_position(&self, pos: usize) -> EditorResult<()>;

    fn mark_dirty(&self);

    fn is_dirty(&self) -> bool;

    fn filename(&self) -> Option<String>;
}

/// A live editor window
pub trait Window: Send + Sync + 'static {
    fn buffer(&self) -> Option<Arc<dyn Buffer>>;

    fn set_buffer(&self, buffer: Arc<dyn Buffer>);

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn scroll_offset(&self) -> usize;

    fn set_scroll_offset(&self, offset: usize);
}
