//! Plugin binary resolution
//!
//! Turns a plugin's source into a runnable binary, consulting the build
//! cache first. Computing content hashes and running the build tool are the
//! job of a [`PluginBuilder`]; the loader only consumes their results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{HostError, Result};
use crate::plugins::build_cache::{BuildCache, BuildCacheEntry, is_valid_hash};

/// Source a plugin binary is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BuildSpec {
    /// Remote repository at a given ref
    Git {
        repository: String,
        #[serde(default = "default_reference")]
        reference: String,
    },
    /// Local source tree
    Local { path: PathBuf },
}

fn default_reference() -> String {
    "main".to_string()
}

/// Where a registered plugin's binary comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    /// Prebuilt binary, used as is
    Binary(PathBuf),
    /// Built on demand through the build cache
    Build(BuildSpec),
}

/// External build collaborator
#[async_trait]
pub trait PluginBuilder: Send + Sync {
    /// Content hash of the source as it is now
    async fn source_hash(&self, spec: &BuildSpec) -> anyhow::Result<String>;

    /// Build the source into `out_dir` and return the binary's path
    async fn build(&self, spec: &BuildSpec, out_dir: &Path) -> anyhow::Result<PathBuf>;
}

/// A binary ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    pub path: PathBuf,
    /// Content hash, `None` for prebuilt binaries
    pub hash: Option<String>,
    /// Whether the build step was skipped
    pub from_cache: bool,
}

/// Resolves plugin sources to binaries through the build cache
pub struct PluginLoader {
    builder: Option<Arc<dyn PluginBuilder>>,
    cache: Mutex<BuildCache>,
}

impl PluginLoader {
    /// Create a loader
    ///
    /// # Arguments
    /// * `builder` - Build collaborator; `None` allows prebuilt binaries only
    /// * `cache` - Build cache consulted before every build
    pub fn new(builder: Option<Arc<dyn PluginBuilder>>, cache: BuildCache) -> Self {
        Self {
            builder,
            cache: Mutex::new(cache),
        }
    }

    /// Resolve a source to a binary, building only on a cache miss
    pub async fn resolve(&self, plugin: &str, source: &PluginSource) -> Result<ResolvedBinary> {
        let spec = match source {
            PluginSource::Binary(path) => {
                if !path.is_file() {
                    return Err(HostError::Spawn(format!(
                        "Plugin binary not found: {:?}",
                        path
                    )));
                }
                return Ok(ResolvedBinary {
                    path: path.clone(),
                    hash: None,
                    from_cache: false,
                });
            }
            PluginSource::Build(spec) => spec,
        };

        let hash = self.source_hash(plugin, spec).await?;
        if let Some(entry) = self.cache.lock().await.lookup(&hash) {
            debug!(plugin, hash = %hash, "Build cache hit: {:?}", entry.binary_path);
            return Ok(ResolvedBinary {
                path: entry.binary_path.clone(),
                hash: Some(hash),
                from_cache: true,
            });
        }

        self.build(plugin, spec, hash).await
    }

    /// Rebuild after the cached binary turned out to be unusable
    pub async fn rebuild(&self, plugin: &str, source: &PluginSource) -> Result<ResolvedBinary> {
        let PluginSource::Build(spec) = source else {
            return Err(HostError::Spawn(format!(
                "{plugin}: prebuilt binary cannot be rebuilt"
            )));
        };
        let hash = self.source_hash(plugin, spec).await?;
        self.cache.lock().await.invalidate(&hash)?;
        self.build(plugin, spec, hash).await
    }

    /// Ask the builder for the source hash; it becomes a directory name
    async fn source_hash(&self, plugin: &str, spec: &BuildSpec) -> Result<String> {
        let hash = self
            .builder()?
            .source_hash(spec)
            .await
            .map_err(|e| HostError::Build(format!("{plugin}: hashing source failed: {e:#}")))?;
        if !is_valid_hash(&hash) {
            return Err(HostError::Build(format!(
                "{plugin}: builder returned unusable source hash {hash:?}"
            )));
        }
        Ok(hash)
    }

    async fn build(&self, plugin: &str, spec: &BuildSpec, hash: String) -> Result<ResolvedBinary> {
        let out_dir = self.cache.lock().await.binary_dir(&hash);
        tokio::fs::create_dir_all(&out_dir).await?;

        info!(plugin, hash = %hash, "Building plugin");
        let path = self
            .builder()?
            .build(spec, &out_dir)
            .await
            .map_err(|e| HostError::Build(format!("{plugin}: {e:#}")))?;

        if !path.is_file() {
            return Err(HostError::Build(format!(
                "{plugin}: build reported {:?}, which does not exist",
                path
            )));
        }

        self.cache.lock().await.record(&hash, &path)?;
        Ok(ResolvedBinary {
            path,
            hash: Some(hash),
            from_cache: false,
        })
    }

    /// Recorded builds
    pub async fn cache_entries(&self) -> Vec<BuildCacheEntry> {
        self.cache.lock().await.entries()
    }

    /// Clear the build cache
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.lock().await.clear()
    }

    fn builder(&self) -> Result<&Arc<dyn PluginBuilder>> {
        self.builder
            .as_ref()
            .ok_or_else(|| HostError::Build("no plugin builder configured".into()))
    }
}
