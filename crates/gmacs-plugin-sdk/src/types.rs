//! Core types for the gmacs plugin system
//!
//! These types are shared between the SDK (plugin side) and the host.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque identifier for a host-owned buffer or window.
///
/// Only meaningful on the connection that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A command a plugin contributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Command name, unique across all loaded plugins
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Whether the command may be invoked interactively (M-x)
    #[serde(default)]
    pub interactive: bool,
    /// Handler name inside the plugin
    #[serde(default)]
    pub handler: String,
    /// Prompts for the command's arguments
    #[serde(default)]
    pub arg_prompts: Vec<String>,
}

/// A major mode a plugin contributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MajorModeSpec {
    pub name: String,
    /// File extensions the mode applies to (e.g., [".rs"])
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Bindings active while the mode is active
    #[serde(default)]
    pub key_bindings: Vec<KeyBindingSpec>,
}

/// A minor mode a plugin contributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorModeSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Global mode rather than buffer-local
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub key_bindings: Vec<KeyBindingSpec>,
}

/// A key binding a plugin contributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBindingSpec {
    /// Key sequence, e.g. "C-c C-g" or "M-x"
    pub sequence: String,
    /// Command the sequence runs
    pub command: String,
    /// Mode the binding applies to; `None` means global
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl KeyBindingSpec {
    /// Create a global binding
    pub fn global(sequence: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
            command: command.into(),
            mode: None,
        }
    }

    /// Create a binding scoped to a mode
    pub fn in_mode(
        sequence: impl Into<String>,
        command: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            sequence: sequence.into(),
            command: command.into(),
            mode: Some(mode.into()),
        }
    }
}

/// Kind of buffer mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Delete,
    Replace,
}

/// One buffer mutation, sent to plugins when a buffer-change hook fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSpec {
    pub kind: ChangeKind,
    pub pos: usize,
    pub length: usize,
    #[serde(default)]
    pub text: String,
}

/// Context handed to `Plugin::initialize`
#[derive(Debug, Clone, Default)]
pub struct InitContext {
    /// Name the host registered the plugin under
    pub plugin: String,
    /// Version of the host
    pub host_version: String,
    /// Manifest defaults merged with user configuration
    pub config: HashMap<String, serde_json::Value>,
}

impl InitContext {
    /// Look up a configuration value and deserialize it
    pub fn config_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
