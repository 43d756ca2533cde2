//! gmacs plugin host
//!
//! Editor-side half of the gmacs plugin system:
//! - Spawning plugin binaries and the stdio handshake
//! - The capability bridge plugins call back into
//! - Remote handles for buffers and windows
//! - Merging plugin commands, modes and key bindings
//! - Plugin lifecycle, hooks and the build cache

pub mod config;
pub mod editor;
pub mod error;
pub mod logging;
pub mod plugins;

pub use config::{HostConfig, PluginSettings, TimeoutConfig};
pub use editor::{Buffer, Editor, EditorError, EditorResult, Window};
pub use error::{HostError, Result};
pub use plugins::{PluginInfo, PluginManager, PluginSource, PluginState};
