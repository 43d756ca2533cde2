//! Host configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration.
//!
//! ```toml
//! [timeouts]
//! handshake_ms = 5000
//! call_ms = 10000
//!
//! [cache]
//! directory = "/var/cache/gmacs/plugins"
//!
//! [plugins.word-count]
//! enabled = true
//! config = { min_length = 2 }
//! ```

use gmacs_plugin_sdk::HandshakeConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Top-level host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Version reported to plugins and checked against `min_gmacs_version`
    pub host_version: String,
    pub timeouts: TimeoutConfig,
    pub cache: CacheConfig,
    /// Per-plugin settings keyed by plugin name
    pub plugins: HashMap<String, PluginSettings>,
    #[serde(skip)]
    pub handshake: HandshakeConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig::default(),
            plugins: HashMap::new(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl HostConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Settings for one plugin, defaulted when absent
    pub fn plugin(&self, name: &str) -> PluginSettings {
        self.plugins.get(name).cloned().unwrap_or_default()
    }
}

/// Bounds on every remote interaction, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hello line after spawn
    pub handshake_ms: u64,
    /// Operational calls, including `Initialize`
    pub call_ms: u64,
    /// `Name`, `Version` and `Description`
    pub metadata_ms: u64,
    /// How long `Cleanup` may run before the process is killed
    pub cleanup_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: 5_000,
            call_ms: 10_000,
            metadata_ms: 1_000,
            cleanup_grace_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    pub fn metadata(&self) -> Duration {
        Duration::from_millis(self.metadata_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

/// Build cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; `<cache dir>/gmacs/plugins` when unset
    pub directory: Option<PathBuf>,
}

impl CacheConfig {
    /// Resolved cache root
    pub fn root(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("gmacs")
                .join("plugins")
        })
    }
}

/// User settings for a single plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub enabled: bool,
    /// Merged over the manifest's default configuration
    pub config: HashMap<String, serde_json::Value>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            config: HashMap::new(),
        }
    }
}
