//! Build cache keyed by source content hash
//!
//! The index lives in `index.json` under the cache root. Build outputs go to
//! `bin/<hash[..2]>/<hash>/`. An entry is only trusted for an exact hash
//! match and only while its binary still exists and is non-empty.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::{HostError, Result};

const INDEX_FILE: &str = "index.json";

/// One cached build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCacheEntry {
    /// Content hash of the source that was built
    pub hash: String,
    /// Unix seconds when the build finished
    pub build_time: u64,
    /// Binary the build produced
    pub binary_path: PathBuf,
}

/// Whether `hash` can key the cache and name a build directory
pub fn is_valid_hash(hash: &str) -> bool {
    !hash.is_empty() && hash.chars().all(|c| c.is_ascii_alphanumeric())
}

fn check_hash(hash: &str) -> Result<()> {
    if is_valid_hash(hash) {
        Ok(())
    } else {
        Err(HostError::Build(format!("Invalid source hash {hash:?}")))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BuildCacheIndex {
    entries: HashMap<String, BuildCacheEntry>,
}

/// Content-hash to binary mapping, persisted across host restarts
pub struct BuildCache {
    root: PathBuf,
    index: BuildCacheIndex,
}

impl BuildCache {
    /// Open (or create) a cache rooted at `root`.
    ///
    /// An unreadable index is discarded rather than trusted.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            match fs::read_to_string(&index_path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
            {
                Ok(index) => index,
                Err(e) => {
                    warn!("Discarding unreadable build cache index {:?}: {}", index_path, e);
                    BuildCacheIndex::default()
                }
            }
        } else {
            BuildCacheIndex::default()
        };

        debug!("Build cache at {:?} with {} entries", root, index.entries.len());
        Ok(Self { root, index })
    }

    /// Get the cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a build for `hash` should write into
    pub fn binary_dir(&self, hash: &str) -> PathBuf {
        let prefix = hash.get(..2).unwrap_or(hash);
        self.root.join("bin").join(prefix).join(hash)
    }

    /// Entry for `hash`, if its binary is still usable
    pub fn lookup(&self, hash: &str) -> Option<&BuildCacheEntry> {
        let entry = self.index.entries.get(hash)?;
        if entry.hash != hash {
            return None;
        }
        match fs::metadata(&entry.binary_path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(entry),
            _ => {
                debug!(
                    "Cached binary for {} is missing or empty: {:?}",
                    hash, entry.binary_path
                );
                None
            }
        }
    }

    /// Record a finished build, replacing any entry for the same hash
    pub fn record(&mut self, hash: &str, binary_path: &Path) -> Result<BuildCacheEntry> {
        check_hash(hash)?;
        let entry = BuildCacheEntry {
            hash: hash.to_string(),
            build_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            binary_path: binary_path.to_path_buf(),
        };
        self.index.entries.insert(hash.to_string(), entry.clone());
        self.save_index()?;
        Ok(entry)
    }

    /// Forget `hash` and delete its build directory
    pub fn invalidate(&mut self, hash: &str) -> Result<()> {
        check_hash(hash)?;
        self.index.entries.remove(hash);
        let dir = self.binary_dir(hash);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.save_index()
    }

    /// Clear all cached entries
    pub fn clear(&mut self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
            fs::create_dir_all(&self.root)?;
        }
        self.index = BuildCacheIndex::default();
        self.save_index()
    }

    /// All recorded entries, usable or not
    pub fn entries(&self) -> Vec<BuildCacheEntry> {
        let mut entries: Vec<_> = self.index.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        entries
    }

    fn save_index(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.index)?;
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, self.root.join(INDEX_FILE))?;
        Ok(())
    }
}
