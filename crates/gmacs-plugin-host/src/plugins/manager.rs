//! Plugin lifecycle manager
//!
//! Owns the plugin table, the spec registry and the hook table. Drives each
//! plugin through `Unloaded -> Loading -> Loaded`, moving it to `Error` on any
//! failure. Nothing leaves `Error` without an explicit `reload`.

use async_trait::async_trait;
use gmacs_plugin_sdk::handshake::{self, HandshakeFailure};
use gmacs_plugin_sdk::protocol::InitializeParams;
use gmacs_plugin_sdk::rpc::RpcPeer;
use gmacs_plugin_sdk::ChangeSpec;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::process::Child;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::editor::{Buffer, Editor};
use crate::error::{HostError, Result};
use crate::plugins::bridge::{HostBridge, PluginRouter};
use crate::plugins::build_cache::BuildCache;
use crate::plugins::container::PluginClient;
use crate::plugins::hooks::{BUFFER_CHANGE, CURSOR_MOVE, HookFailure, HookTable};
use crate::plugins::loader::{PluginBuilder, PluginLoader, PluginSource};
use crate::plugins::manifest::PluginManifest;
use crate::plugins::spec_registry::{PluginSpecs, SpecRegistry};
use crate::plugins::transport::{PluginChannel, ProcessTransport, Transport};

/// Lifecycle state of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
    Error,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Loading => "loading",
            PluginState::Loaded => "loaded",
            PluginState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of one plugin for listings
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub state: PluginState,
    pub enabled: bool,
    pub load_time: Option<SystemTime>,
    /// Set on failure, cleared when the plugin next reaches `Loaded`
    pub last_error: Option<String>,
    pub binary_path: Option<PathBuf>,
    pub dependencies: Vec<String>,
}

/// Live connection of a loaded plugin
struct PluginRuntime {
    client: Arc<PluginClient>,
    bridge: Arc<HostBridge>,
    process: Option<std::sync::Mutex<Child>>,
    /// Distinguishes this connection from earlier ones of the same plugin
    generation: u64,
}

/// What a call into a loaded plugin needs
#[derive(Clone)]
struct ActivePlugin {
    client: Arc<PluginClient>,
    bridge: Arc<HostBridge>,
    generation: u64,
}

/// Runtime record of a registered plugin
struct LoadedPlugin {
    name: String,
    source: PluginSource,
    manifest: Option<PluginManifest>,
    /// Manifest defaults merged with user settings
    config: HashMap<String, Value>,
    enabled: bool,
    state: PluginState,
    version: Option<String>,
    description: Option<String>,
    binary_path: Option<PathBuf>,
    load_time: Option<SystemTime>,
    last_error: Option<String>,
    runtime: Option<PluginRuntime>,
}

impl LoadedPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            state: self.state,
            enabled: self.enabled,
            load_time: self.load_time,
            last_error: self.last_error.clone(),
            binary_path: self.binary_path.clone(),
            dependencies: self
                .manifest
                .as_ref()
                .map(|m| m.dependencies.clone())
                .unwrap_or_default(),
        }
    }

    fn active(&self) -> Option<ActivePlugin> {
        self.runtime.as_ref().map(|rt| ActivePlugin {
            client: rt.client.clone(),
            bridge: rt.bridge.clone(),
            generation: rt.generation,
        })
    }
}

/// Result of a successful start, before specs are published
struct Started {
    runtime: PluginRuntime,
    version: String,
    description: String,
    specs: PluginSpecs,
    binary: PathBuf,
}

/// Builder for a [`PluginManager`]
pub struct PluginManagerBuilder {
    config: HostConfig,
    editor: Arc<dyn Editor>,
    transport: Option<Arc<dyn Transport>>,
    builder: Option<Arc<dyn PluginBuilder>>,
    cache: Option<BuildCache>,
}

impl PluginManagerBuilder {
    /// Use a transport other than child processes
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the build collaborator for plugins built from source
    pub fn with_builder(mut self, builder: Arc<dyn PluginBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    /// Use an already opened build cache
    pub fn with_cache(mut self, cache: BuildCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the manager
    pub fn build(self) -> Result<PluginManager> {
        let cache = match self.cache {
            Some(cache) => cache,
            None => BuildCache::open(self.config.cache.root())?,
        };
        let inner = ManagerInner {
            loader: PluginLoader::new(self.builder, cache),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ProcessTransport)),
            editor: self.editor,
            config: self.config,
            plugins: RwLock::new(IndexMap::new()),
            registry: RwLock::new(SpecRegistry::new()),
            hooks: RwLock::new(HookTable::new()),
            next_generation: AtomicU64::new(1),
        };
        Ok(PluginManager {
            inner: Arc::new(inner),
        })
    }
}

/// Lifecycle manager for out-of-process plugins. Cheap to clone.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: HostConfig,
    editor: Arc<dyn Editor>,
    transport: Arc<dyn Transport>,
    loader: PluginLoader,
    plugins: RwLock<IndexMap<String, LoadedPlugin>>,
    registry: RwLock<SpecRegistry>,
    hooks: RwLock<HookTable>,
    next_generation: AtomicU64,
}

impl PluginManager {
    /// Start building a manager
    pub fn builder(config: HostConfig, editor: Arc<dyn Editor>) -> PluginManagerBuilder {
        PluginManagerBuilder {
            config,
            editor,
            transport: None,
            builder: None,
            cache: None,
        }
    }

    /// Manager spawning prebuilt plugin binaries as child processes
    pub fn new(config: HostConfig, editor: Arc<dyn Editor>) -> Result<Self> {
        Self::builder(config, editor).build()
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// The build-cache-backed loader
    pub fn loader(&self) -> &PluginLoader {
        &self.inner.loader
    }

    /// Register a plugin in `Unloaded` state
    pub async fn register(
        &self,
        name: &str,
        source: PluginSource,
        manifest: Option<PluginManifest>,
    ) -> Result<()> {
        self.inner.register(name, source, manifest).await
    }

    /// Forget a plugin that is not running
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let mut plugins = self.inner.plugins.write().await;
        let plugin = plugins
            .get(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        if plugin.runtime.is_some() || plugin.state == PluginState::Loading {
            return Err(HostError::InvalidState(format!(
                "{name} is {}; unload it first",
                plugin.state
            )));
        }
        plugins.shift_remove(name);
        Ok(())
    }

    /// Enable or disable a plugin for future loads
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut plugins = self.inner.plugins.write().await;
        let plugin = plugins
            .get_mut(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        plugin.enabled = enabled;
        Ok(())
    }

    /// Build or reuse the binary, spawn, handshake, initialize and publish
    /// specs. Only valid from `Unloaded`.
    pub async fn load(&self, name: &str) -> Result<()> {
        self.inner.load(name).await
    }

    /// Tear a plugin down and load it again; the way out of `Error`
    pub async fn reload(&self, name: &str) -> Result<()> {
        let state = self
            .state(name)
            .await
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        match state {
            PluginState::Loaded | PluginState::Error => self.inner.unload(name).await?,
            PluginState::Unloaded => {}
            PluginState::Loading => {
                return Err(HostError::InvalidState(format!("{name} is still loading")));
            }
        }
        self.inner.load(name).await
    }

    /// Cleanup, remove specs and hooks, stop the process
    pub async fn unload(&self, name: &str) -> Result<()> {
        self.inner.unload(name).await
    }

    /// Load every enabled, unloaded plugin, dependencies first
    pub async fn load_all(&self) -> Vec<(String, Result<()>)> {
        let (ordered, cyclic) = {
            let plugins = self.inner.plugins.read().await;
            dependency_order(&plugins)
        };

        let mut results = Vec::new();
        for name in ordered {
            let result = self.inner.load(&name).await;
            results.push((name, result));
        }
        for name in cyclic {
            let err = HostError::InvalidState(format!("{name} is part of a dependency cycle"));
            results.push((name, Err(err)));
        }
        results
    }

    /// Unload every running plugin, most recently registered first
    pub async fn shutdown(&self) {
        let names: Vec<String> = {
            let plugins = self.inner.plugins.read().await;
            plugins
                .values()
                .rev()
                .filter(|p| matches!(p.state, PluginState::Loaded | PluginState::Error))
                .map(|p| p.name.clone())
                .collect()
        };
        for name in names {
            if let Err(e) = self.inner.unload(&name).await {
                warn!(plugin = %name, "Unload during shutdown failed: {}", e);
            }
        }
        info!("Plugin manager shut down");
    }

    pub async fn state(&self, name: &str) -> Option<PluginState> {
        self.inner.plugins.read().await.get(name).map(|p| p.state)
    }

    pub async fn info(&self, name: &str) -> Option<PluginInfo> {
        self.inner.plugins.read().await.get(name).map(LoadedPlugin::info)
    }

    /// All registered plugins in registration order
    pub async fn list(&self) -> Vec<PluginInfo> {
        self.inner
            .plugins
            .read()
            .await
            .values()
            .map(LoadedPlugin::info)
            .collect()
    }

    /// Read access to the merged specs of all loaded plugins
    pub async fn registry(&self) -> RwLockReadGuard<'_, SpecRegistry> {
        self.inner.registry.read().await
    }

    /// Plugins subscribed to `event`
    pub async fn hook_subscribers(&self, event: &str) -> Vec<String> {
        self.inner.hooks.read().await.subscribers(event)
    }

    /// Run a plugin-registered command in its owning plugin
    pub async fn execute_command(&self, name: &str, args: Vec<Value>) -> Result<()> {
        match self.inner.route_command(name, args).await {
            Some(result) => result,
            None => Err(HostError::CommandNotFound(name.to_string())),
        }
    }

    /// Completion candidates for a plugin command's argument
    pub async fn completions(&self, command: &str, prefix: &str) -> Result<Vec<String>> {
        let owner = self.inner.command_owner(command).await?;
        self.inner
            .call_plugin(&owner, |p| async move { p.client.completions(command, prefix).await })
            .await
    }

    /// Fire a hook event for every subscriber, collecting failures
    pub async fn trigger_hook(&self, event: &str, args: Vec<Value>) -> Vec<HookFailure> {
        self.inner.trigger_hook(event, args).await
    }

    pub async fn activate_major_mode(&self, mode: &str, buffer: &Arc<dyn Buffer>) -> Result<()> {
        let owner = self.inner.major_mode_owner(mode).await?;
        self.inner
            .notify(&owner, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.on_activate(id).await
            })
            .await
    }

    pub async fn deactivate_major_mode(&self, mode: &str, buffer: &Arc<dyn Buffer>) -> Result<()> {
        let owner = self.inner.major_mode_owner(mode).await?;
        self.inner
            .notify(&owner, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.on_deactivate(id).await
            })
            .await
    }

    pub async fn notify_file_open(
        &self,
        mode: &str,
        buffer: &Arc<dyn Buffer>,
        filename: &str,
    ) -> Result<()> {
        let owner = self.inner.major_mode_owner(mode).await?;
        self.inner
            .notify(&owner, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.on_file_open(id, filename).await
            })
            .await
    }

    pub async fn notify_file_save(
        &self,
        mode: &str,
        buffer: &Arc<dyn Buffer>,
        filename: &str,
    ) -> Result<()> {
        let owner = self.inner.major_mode_owner(mode).await?;
        self.inner
            .notify(&owner, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.on_file_save(id, filename).await
            })
            .await
    }

    pub async fn enable_minor_mode(&self, mode: &str, buffer: &Arc<dyn Buffer>) -> Result<()> {
        let owner = self.inner.minor_mode_owner(mode).await?;
        self.inner
            .notify(&owner, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.enable(id).await
            })
            .await
    }

    pub async fn disable_minor_mode(&self, mode: &str, buffer: &Arc<dyn Buffer>) -> Result<()> {
        let owner = self.inner.minor_mode_owner(mode).await?;
        self.inner
            .notify(&owner, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.disable(id).await
            })
            .await
    }

    pub async fn minor_mode_enabled(&self, mode: &str, buffer: &Arc<dyn Buffer>) -> Result<bool> {
        let owner = self.inner.minor_mode_owner(mode).await?;
        self.inner
            .notify(&owner, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.is_enabled(id).await
            })
            .await
    }

    /// Tell `buffer-change` subscribers about an edit
    pub async fn notify_buffer_change(
        &self,
        buffer: &Arc<dyn Buffer>,
        change: ChangeSpec,
    ) -> Vec<HookFailure> {
        self.inner
            .broadcast(BUFFER_CHANGE, |p| {
                let change = change.clone();
                async move {
                    let id = p.bridge.issue_buffer(buffer);
                    p.client.on_buffer_change(id, change).await
                }
            })
            .await
    }

    /// Tell `cursor-move` subscribers the cursor moved
    pub async fn notify_cursor_move(
        &self,
        buffer: &Arc<dyn Buffer>,
        old_pos: usize,
        new_pos: usize,
    ) -> Vec<HookFailure> {
        self.inner
            .broadcast(CURSOR_MOVE, |p| async move {
                let id = p.bridge.issue_buffer(buffer);
                p.client.on_cursor_move(id, old_pos, new_pos).await
            })
            .await
    }
}

impl ManagerInner {
    async fn register(
        &self,
        name: &str,
        source: PluginSource,
        manifest: Option<PluginManifest>,
    ) -> Result<()> {
        if let Some(manifest) = &manifest {
            manifest.validate()?;
            if manifest.name != name {
                return Err(HostError::Manifest(format!(
                    "manifest declares '{}' but was registered as '{name}'",
                    manifest.name
                )));
            }
        }

        let settings = self.config.plugin(name);
        let config = match &manifest {
            Some(manifest) => manifest.merged_config(&settings.config),
            None => settings.config.clone(),
        };

        let mut plugins = self.plugins.write().await;
        if let Some(existing) = plugins.get(name) {
            if existing.state != PluginState::Unloaded {
                return Err(HostError::InvalidState(format!(
                    "{name} is {}; cannot re-register",
                    existing.state
                )));
            }
        }

        info!(plugin = name, "Registering plugin");
        plugins.insert(
            name.to_string(),
            LoadedPlugin {
                name: name.to_string(),
                source,
                version: manifest.as_ref().map(|m| m.version.clone()),
                description: manifest.as_ref().map(|m| m.description.clone()),
                manifest,
                config,
                enabled: settings.enabled,
                state: PluginState::Unloaded,
                binary_path: None,
                load_time: None,
                last_error: None,
                runtime: None,
            },
        );
        Ok(())
    }

    async fn load(self: &Arc<Self>, name: &str) -> Result<()> {
        let (source, config) = match self.begin_load(name).await {
            Ok(ready) => ready,
            Err(e) => {
                // Unmet preconditions stay Unloaded but are still reported
                if matches!(
                    e,
                    HostError::Disabled(_)
                        | HostError::IncompatibleHost { .. }
                        | HostError::MissingDependency { .. }
                ) {
                    warn!(plugin = name, "Not loading: {}", e);
                    self.record_error(name, &e).await;
                }
                return Err(e);
            }
        };
        info!(plugin = name, "Loading plugin");

        let started = match self.start(name, &source, config).await {
            Ok(started) => started,
            Err(e) => {
                self.fail_load(name, &e).await;
                return Err(e);
            }
        };
        self.finish_load(name, started).await
    }

    /// Check preconditions and move to `Loading`
    async fn begin_load(&self, name: &str) -> Result<(PluginSource, HashMap<String, Value>)> {
        let mut plugins = self.plugins.write().await;
        let plugin = plugins
            .get(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;

        if plugin.state != PluginState::Unloaded {
            return Err(HostError::InvalidState(format!(
                "{name} is {}; only an unloaded plugin can be loaded",
                plugin.state
            )));
        }
        if !plugin.enabled {
            return Err(HostError::Disabled(name.to_string()));
        }
        if let Some(manifest) = &plugin.manifest {
            manifest.check_host(&self.config.host_version)?;
            for dependency in &manifest.dependencies {
                let loaded = plugins
                    .get(dependency)
                    .is_some_and(|d| d.state == PluginState::Loaded);
                if !loaded {
                    return Err(HostError::MissingDependency {
                        plugin: name.to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        let plugin = plugins
            .get_mut(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        plugin.state = PluginState::Loading;
        Ok((plugin.source.clone(), plugin.config.clone()))
    }

    async fn start(
        self: &Arc<Self>,
        name: &str,
        source: &PluginSource,
        config: HashMap<String, Value>,
    ) -> Result<Started> {
        let resolved = self.loader.resolve(name, source).await?;

        let (runtime, binary) = match self.connect(name, &resolved.path).await {
            Ok(runtime) => (runtime, resolved.path),
            Err(e) if resolved.from_cache && is_unusable_binary(&e) => {
                warn!(plugin = name, "Cached binary is unusable ({}), rebuilding", e);
                let rebuilt = self.loader.rebuild(name, source).await?;
                (self.connect(name, &rebuilt.path).await?, rebuilt.path)
            }
            Err(e) => return Err(e),
        };

        match self.query(name, &runtime.client, config).await {
            Ok((version, description, specs)) => Ok(Started {
                runtime,
                version,
                description,
                specs,
                binary,
            }),
            Err(e) => {
                self.teardown(runtime, false).await;
                Err(e)
            }
        }
    }

    /// Open the channel, handshake, and start serving the bridge
    async fn connect(self: &Arc<Self>, name: &str, binary: &Path) -> Result<PluginRuntime> {
        let PluginChannel {
            mut reader,
            writer,
            process,
        } = self
            .transport
            .open(name, binary, &self.config.handshake)
            .await?;

        let hello = handshake::accept(
            &mut reader,
            &self.config.handshake,
            self.config.timeouts.handshake(),
        )
        .await?;
        debug!(plugin = name, pid = ?hello.pid, "Handshake complete");

        let (peer, driver) = RpcPeer::new(name, reader, writer, self.config.timeouts.call());
        let client = Arc::new(PluginClient::new(name, peer, self.config.timeouts.clone()));
        let router: Weak<dyn PluginRouter> = Arc::downgrade(self) as Weak<dyn PluginRouter>;
        let bridge = Arc::new(HostBridge::new(
            name,
            self.editor.clone(),
            router,
            client.in_flight(),
        ));
        driver.start(bridge.clone());

        Ok(PluginRuntime {
            client,
            bridge,
            process: process.map(std::sync::Mutex::new),
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
        })
    }

    /// Metadata, `Initialize`, then the spec queries
    async fn query(
        &self,
        name: &str,
        client: &PluginClient,
        config: HashMap<String, Value>,
    ) -> Result<(String, String, PluginSpecs)> {
        let reported = client.plugin_name().await?;
        if reported != name {
            warn!(plugin = name, reported = %reported, "Plugin reports a different name");
        }
        let version = client.version().await?;
        let description = client.description().await?;

        client
            .initialize(InitializeParams {
                plugin: name.to_string(),
                host_version: self.config.host_version.clone(),
                config,
            })
            .await?;

        let specs = client.specs().await?;
        Ok((version, description, specs))
    }

    /// Publish specs and move to `Loaded`
    async fn finish_load(self: &Arc<Self>, name: &str, started: Started) -> Result<()> {
        let Started {
            runtime,
            version,
            description,
            specs,
            binary,
        } = started;

        if let Err(conflict) = self.registry.write().await.register(name, specs) {
            let err = HostError::from(conflict);
            self.teardown(runtime, true).await;
            self.fail_load(name, &err).await;
            return Err(err);
        }

        let client = runtime.client.clone();
        let generation = runtime.generation;
        let orphaned = {
            let mut plugins = self.plugins.write().await;
            match plugins.get_mut(name) {
                Some(plugin) if plugin.state == PluginState::Loading => {
                    plugin.state = PluginState::Loaded;
                    plugin.version = Some(version.clone());
                    plugin.description = Some(description);
                    plugin.binary_path = Some(binary);
                    plugin.load_time = Some(SystemTime::now());
                    plugin.last_error = None;
                    plugin.runtime = Some(runtime);
                    None
                }
                _ => Some(runtime),
            }
        };

        if let Some(runtime) = orphaned {
            self.registry.write().await.unregister(name);
            self.hooks.write().await.remove_plugin(name);
            self.teardown(runtime, true).await;
            return Err(HostError::InvalidState(format!(
                "{name} was unregistered while loading"
            )));
        }

        self.spawn_monitor(name, client, generation);
        info!(plugin = name, version = %version, "Plugin loaded");
        Ok(())
    }

    async fn fail_load(&self, name: &str, err: &HostError) {
        self.hooks.write().await.remove_plugin(name);
        if let Some(plugin) = self.plugins.write().await.get_mut(name) {
            plugin.state = PluginState::Error;
            plugin.last_error = Some(err.to_string());
        }
        error!(plugin = name, "Plugin failed to load: {}", err);
        self.editor
            .show_message(&format!("Plugin {name} failed to load: {err}"));
    }

    /// Move a loaded plugin to `Error` after its connection failed
    async fn fail_loaded(&self, name: &str, generation: u64, err: &HostError) {
        let runtime = {
            let mut plugins = self.plugins.write().await;
            let Some(plugin) = plugins.get_mut(name) else {
                return;
            };
            let current = plugin.runtime.as_ref().map(|rt| rt.generation);
            if plugin.state != PluginState::Loaded || current != Some(generation) {
                return;
            }
            plugin.state = PluginState::Error;
            plugin.last_error = Some(err.to_string());
            plugin.runtime.take()
        };

        self.registry.write().await.unregister(name);
        self.hooks.write().await.remove_plugin(name);
        if let Some(runtime) = runtime {
            self.teardown(runtime, false).await;
        }

        error!(plugin = name, "Plugin failed: {}", err);
        self.editor
            .show_message(&format!("Plugin {name} failed: {err}"));
    }

    fn spawn_monitor(self: &Arc<Self>, name: &str, client: Arc<PluginClient>, generation: u64) {
        let manager = Arc::downgrade(self);
        let name = name.to_string();
        tokio::spawn(async move {
            client.peer().closed().await;
            if let Some(manager) = manager.upgrade() {
                let err = HostError::Transport("connection to plugin lost".into());
                manager.fail_loaded(&name, generation, &err).await;
            }
        });
    }

    async fn unload(&self, name: &str) -> Result<()> {
        let runtime = {
            let mut plugins = self.plugins.write().await;
            let plugin = plugins
                .get_mut(name)
                .ok_or_else(|| HostError::NotFound(name.to_string()))?;
            match plugin.state {
                PluginState::Loaded | PluginState::Error => {}
                state => {
                    return Err(HostError::InvalidState(format!(
                        "{name} is {state}; nothing to unload"
                    )));
                }
            }
            plugin.state = PluginState::Unloaded;
            plugin.runtime.take()
        };

        let removed = self.registry.write().await.unregister(name);
        self.hooks.write().await.remove_plugin(name);
        if let Some(runtime) = runtime {
            self.teardown(runtime, true).await;
        }
        info!(plugin = name, removed_specs = removed, "Plugin unloaded");
        Ok(())
    }

    /// Stop a connection. With `graceful`, the plugin gets `Cleanup` and the
    /// grace period to exit before it is killed.
    async fn teardown(&self, runtime: PluginRuntime, graceful: bool) {
        let PluginRuntime {
            client,
            bridge,
            process,
            ..
        } = runtime;

        if graceful {
            if let Err(e) = client.cleanup().await {
                warn!(plugin = %client.name(), "Cleanup failed: {}", e);
            }
        }
        bridge.clear_handles();
        client.close();

        let Some(process) = process else {
            return;
        };
        let mut child = process
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if graceful {
            let grace = self.config.timeouts.cleanup_grace();
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                debug!(plugin = %client.name(), "Plugin exited: {:?}", status);
                return;
            }
        }
        if let Err(e) = child.kill().await {
            debug!(plugin = %client.name(), "Kill failed: {}", e);
        }
    }

    async fn active(&self, name: &str) -> Result<ActivePlugin> {
        let plugins = self.plugins.read().await;
        let plugin = plugins
            .get(name)
            .ok_or_else(|| HostError::NotFound(name.to_string()))?;
        if plugin.state != PluginState::Loaded {
            return Err(HostError::InvalidState(format!(
                "{name} is {}",
                plugin.state
            )));
        }
        plugin
            .active()
            .ok_or_else(|| HostError::InvalidState(format!("{name} has no connection")))
    }

    /// Call into a loaded plugin; a fatal error moves it to `Error`
    async fn call_plugin<T, F, Fut>(&self, name: &str, call: F) -> Result<T>
    where
        F: FnOnce(ActivePlugin) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let active = self.active(name).await?;
        let generation = active.generation;
        let result = call(active).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                self.fail_loaded(name, generation, e).await;
            }
        }
        result
    }

    /// Like `call_plugin`, also recording any failure as the last error
    async fn notify<T, F, Fut>(&self, name: &str, call: F) -> Result<T>
    where
        F: FnOnce(ActivePlugin) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = self.call_plugin(name, call).await;
        if let Err(e) = &result {
            self.record_error(name, e).await;
        }
        result
    }

    /// Call every loaded subscriber of `event`, collecting failures
    async fn broadcast<F, Fut>(&self, event: &str, call: F) -> Vec<HookFailure>
    where
        F: Fn(ActivePlugin) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let subscribers = self.hooks.read().await.subscribers(event);
        let mut failures = Vec::new();
        for plugin in subscribers {
            if self.state_of(&plugin).await != Some(PluginState::Loaded) {
                debug!(plugin = %plugin, event, "Skipping subscriber that is not loaded");
                continue;
            }
            if let Err(e) = self.notify(&plugin, &call).await {
                warn!(plugin = %plugin, event, "Hook handler failed: {}", e);
                failures.push(HookFailure {
                    plugin,
                    error: e.to_string(),
                });
            }
        }
        failures
    }

    async fn record_error(&self, name: &str, err: &HostError) {
        if let Some(plugin) = self.plugins.write().await.get_mut(name) {
            plugin.last_error = Some(err.to_string());
        }
    }

    async fn state_of(&self, name: &str) -> Option<PluginState> {
        self.plugins.read().await.get(name).map(|p| p.state)
    }

    async fn command_owner(&self, command: &str) -> Result<String> {
        self.registry
            .read()
            .await
            .command_owner(command)
            .map(str::to_string)
            .ok_or_else(|| HostError::CommandNotFound(command.to_string()))
    }

    async fn major_mode_owner(&self, mode: &str) -> Result<String> {
        self.registry
            .read()
            .await
            .major_mode_owner(mode)
            .map(str::to_string)
            .ok_or_else(|| HostError::ModeNotFound(mode.to_string()))
    }

    async fn minor_mode_owner(&self, mode: &str) -> Result<String> {
        self.registry
            .read()
            .await
            .minor_mode_owner(mode)
            .map(str::to_string)
            .ok_or_else(|| HostError::ModeNotFound(mode.to_string()))
    }
}

#[async_trait]
impl PluginRouter for ManagerInner {
    async fn add_hook(&self, plugin: &str, event: &str) -> Result<()> {
        match self.state_of(plugin).await {
            Some(PluginState::Loading | PluginState::Loaded) => {}
            Some(state) => {
                return Err(HostError::InvalidState(format!("{plugin} is {state}")));
            }
            None => return Err(HostError::NotFound(plugin.to_string())),
        }
        if self.hooks.write().await.add(event, plugin) {
            debug!(plugin, event, "Hook added");
        }
        Ok(())
    }

    async fn trigger_hook(&self, event: &str, args: Vec<Value>) -> Vec<HookFailure> {
        self.broadcast(event, |p| {
            let args = args.clone();
            async move { p.client.handle_hook(event, args).await }
        })
        .await
    }

    async fn route_command(&self, name: &str, args: Vec<Value>) -> Option<Result<()>> {
        let owner = self.command_owner(name).await.ok()?;
        Some(
            self.call_plugin(&owner, |p| async move { p.client.execute_command(name, args).await })
                .await,
        )
    }
}

/// Whether a spawn failure suggests the cached binary itself is bad
fn is_unusable_binary(err: &HostError) -> bool {
    matches!(
        err,
        HostError::Spawn(_) | HostError::Handshake(HandshakeFailure::ProcessExited)
    )
}

/// Enabled, unloaded plugins with dependencies first, plus any left over
/// because of a cycle
fn dependency_order(plugins: &IndexMap<String, LoadedPlugin>) -> (Vec<String>, Vec<String>) {
    let candidates: Vec<&LoadedPlugin> = plugins
        .values()
        .filter(|p| p.enabled && p.state == PluginState::Unloaded)
        .collect();
    let names: HashSet<&str> = candidates.iter().map(|p| p.name.as_str()).collect();

    let mut ordered: Vec<String> = Vec::new();
    let mut placed: HashSet<&str> = HashSet::new();
    loop {
        let ready: Vec<&LoadedPlugin> = candidates
            .iter()
            .copied()
            .filter(|p| !placed.contains(p.name.as_str()))
            .filter(|p| {
                p.manifest.as_ref().is_none_or(|m| {
                    m.dependencies
                        .iter()
                        .all(|d| !names.contains(d.as_str()) || placed.contains(d.as_str()))
                })
            })
            .collect();
        if ready.is_empty() {
            break;
        }
        for plugin in ready {
            placed.insert(plugin.name.as_str());
            ordered.push(plugin.name.clone());
        }
    }

    let cyclic = candidates
        .iter()
        .filter(|p| !placed.contains(p.name.as_str()))
        .map(|p| p.name.clone())
        .collect();
    (ordered, cyclic)
}
