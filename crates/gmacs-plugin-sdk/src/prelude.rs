//! Prelude module for convenient imports
//!
//! ```rust,ignore
//! use gmacs_plugin_sdk::prelude::*;
//! ```

pub use crate::error::{PluginError, Result};
pub use crate::host::{BufferHandle, HostClient, WindowHandle};
pub use crate::traits::{CommandPlugin, MajorModePlugin, MinorModePlugin, Plugin};
pub use crate::types::*;

pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use serde_json::{Value, json};
