//! Plugin manifest
//!
//! Static declaration of a plugin, read from `manifest.json` next to its
//! source or binary.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{HostError, Result};

/// Plugin metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Name, unique within the host
    pub name: String,
    /// Semantic version
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Entry point binary, relative to the manifest
    #[serde(default)]
    pub binary: String,
    /// Plugins that must be loaded first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Oldest host version the plugin works with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_gmacs_version: Option<String>,
    /// Configuration used when the user sets nothing
    #[serde(default)]
    pub default_config: HashMap<String, serde_json::Value>,
}

impl PluginManifest {
    /// Parse and validate a manifest
    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content)
            .map_err(|e| HostError::Manifest(format!("invalid manifest JSON: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Check required fields and version syntax
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HostError::Manifest("name is required".into()));
        }
        Version::parse(&self.version).map_err(|e| {
            HostError::Manifest(format!("{}: invalid version {:?}: {e}", self.name, self.version))
        })?;
        if let Some(min) = &self.min_gmacs_version {
            Version::parse(min).map_err(|e| {
                HostError::Manifest(format!(
                    "{}: invalid min_gmacs_version {:?}: {e}",
                    self.name, min
                ))
            })?;
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(HostError::Manifest(format!("{} depends on itself", self.name)));
        }
        Ok(())
    }

    /// Fail unless `host_version` satisfies `min_gmacs_version`
    pub fn check_host(&self, host_version: &str) -> Result<()> {
        let Some(min) = &self.min_gmacs_version else {
            return Ok(());
        };
        let incompatible = || HostError::IncompatibleHost {
            plugin: self.name.clone(),
            required: min.clone(),
            host: host_version.to_string(),
        };
        let req = VersionReq::parse(&format!(">={min}")).map_err(|_| incompatible())?;
        let host = Version::parse(host_version).map_err(|_| incompatible())?;
        if req.matches(&host) {
            Ok(())
        } else {
            Err(incompatible())
        }
    }

    /// Defaults overlaid with user settings
    pub fn merged_config(
        &self,
        user: &HashMap<String, serde_json::Value>,
    ) -> HashMap<String, serde_json::Value> {
        let mut merged = self.default_config.clone();
        merged.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}
