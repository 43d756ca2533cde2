//! Shared fixtures for plugin host integration tests
//!
//! Plugins run in-process over `tokio::io::duplex` instead of as child
//! processes; everything above the transport is the real code path.

#![allow(dead_code)]

use async_trait::async_trait;
use gmacs_plugin_host::config::HostConfig;
use gmacs_plugin_host::editor::{Buffer, Editor, EditorError, EditorResult, Window};
use gmacs_plugin_host::plugins::{
    BuildCache, BuildSpec, PluginBuilder, PluginChannel, PluginManager, PluginState, Transport,
};
use gmacs_plugin_host::{HostError, Result};
use gmacs_plugin_sdk::prelude::*;
use gmacs_plugin_sdk::HandshakeConfig;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Editor stub
// ---------------------------------------------------------------------------

pub struct StubBuffer {
    name: String,
    content: Mutex<String>,
    cursor: Mutex<usize>,
    dirty: AtomicBool,
    filename: Option<String>,
}

impl StubBuffer {
    pub fn new(name: &str, content: &str, filename: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            content: Mutex::new(content.to_string()),
            cursor: Mutex::new(0),
            dirty: AtomicBool::new(false),
            filename: filename.map(str::to_string),
        }
    }
}

impl Buffer for StubBuffer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn content(&self) -> String {
        self.content.lock().unwrap().clone()
    }

    fn set_content(&self, content: &str) {
        *self.content.lock().unwrap() = content.to_string();
        self.mark_dirty();
    }

    fn insert_at(&self, pos: usize, text: &str) -> EditorResult<()> {
        let mut content = self.content.lock().unwrap();
        if pos > content.len() || !content.is_char_boundary(pos) {
            return Err(EditorError::InvalidRange {
                start: pos,
                end: pos,
                len: content.len(),
            });
        }
        content.insert_str(pos, text);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn delete_range(&self, start: usize, end: usize) -> EditorResult<()> {
        let mut content = self.content.lock().unwrap();
        if start > end || end > content.len() {
            return Err(EditorError::InvalidRange {
                start,
                end,
                len: content.len(),
            });
        }
        content.replace_range(start..end, "");
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cursor_position(&self) -> usize {
        *self.cursor.lock().unwrap()
    }

    fn set_cursor_position(&self, pos: usize) -> EditorResult<()> {
        let len = self.content.lock().unwrap().len();
        if pos > len {
            return Err(EditorError::InvalidRange {
                start: pos,
                end: pos,
                len,
            });
        }
        *self.cursor.lock().unwrap() = pos;
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn filename(&self) -> Option<String> {
        self.filename.clone()
    }
}

/// Shows one buffer; holds it weakly so killing the buffer really frees it
pub struct StubWindow {
    buffer: Mutex<Option<Weak<dyn Buffer>>>,
    scroll: AtomicUsize,
}

impl Window for StubWindow {
    fn buffer(&self) -> Option<Arc<dyn Buffer>> {
        self.buffer.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn set_buffer(&self, buffer: Arc<dyn Buffer>) {
        *self.buffer.lock().unwrap() = Some(Arc::downgrade(&buffer));
    }

    fn width(&self) -> usize {
        80
    }

    fn height(&self) -> usize {
        24
    }

    fn scroll_offset(&self) -> usize {
        self.scroll.load(Ordering::SeqCst)
    }

    fn set_scroll_offset(&self, offset: usize) {
        self.scroll.store(offset, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct EditorState {
    buffers: Vec<Arc<dyn Buffer>>,
    current: Option<String>,
    statuses: Vec<String>,
    messages: Vec<String>,
    commands: Vec<String>,
    options: HashMap<String, Value>,
    major_modes: HashMap<String, String>,
    minor_modes: Vec<(String, String)>,
}

/// In-memory editor recording everything plugins ask of it
pub struct StubEditor {
    state: Mutex<EditorState>,
    window: Arc<StubWindow>,
}

/// Commands the stub editor knows natively
pub const BUILTIN_COMMANDS: &[&str] = &["save-buffer", "kill-buffer"];

impl StubEditor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(EditorState::default()),
            window: Arc::new(StubWindow {
                buffer: Mutex::new(None),
                scroll: AtomicUsize::new(0),
            }),
        })
    }

    /// Add a buffer and make it current
    pub fn add_buffer(&self, name: &str, content: &str) -> Arc<dyn Buffer> {
        let buffer: Arc<dyn Buffer> = Arc::new(StubBuffer::new(name, content, None));
        let mut state = self.state.lock().unwrap();
        state.buffers.push(buffer.clone());
        state.current = Some(name.to_string());
        self.window.set_buffer(buffer.clone());
        buffer
    }

    /// Drop the editor's reference to a buffer
    pub fn kill_buffer(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.buffers.retain(|b| b.name() != name);
        if state.current.as_deref() == Some(name) {
            state.current = None;
        }
    }

    pub fn window(&self) -> Arc<StubWindow> {
        self.window.clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.state.lock().unwrap().statuses.clone()
    }

    pub fn last_status(&self) -> Option<String> {
        self.state.lock().unwrap().statuses.last().cloned()
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn major_mode(&self, buffer: &str) -> Option<String> {
        self.state.lock().unwrap().major_modes.get(buffer).cloned()
    }

    pub fn option(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().options.get(name).cloned()
    }

    fn lookup(&self, name: &str) -> EditorResult<Arc<dyn Buffer>> {
        self.find_buffer(name)
            .ok_or_else(|| EditorError::BufferNotFound(name.to_string()))
    }
}

impl Editor for StubEditor {
    fn set_status(&self, message: &str) {
        self.state.lock().unwrap().statuses.push(message.to_string());
    }

    fn show_message(&self, message: &str) {
        self.state.lock().unwrap().messages.push(message.to_string());
    }

    fn execute_command(&self, name: &str, _args: &[Value]) -> EditorResult<()> {
        if !BUILTIN_COMMANDS.contains(&name) {
            return Err(EditorError::UnknownCommand(name.to_string()));
        }
        self.state.lock().unwrap().commands.push(name.to_string());
        Ok(())
    }

    fn set_major_mode(&self, buffer: &str, mode: &str) -> EditorResult<()> {
        self.lookup(buffer)?;
        self.state
            .lock()
            .unwrap()
            .major_modes
            .insert(buffer.to_string(), mode.to_string());
        Ok(())
    }

    fn toggle_minor_mode(&self, buffer: &str, mode: &str) -> EditorResult<()> {
        self.lookup(buffer)?;
        let mut state = self.state.lock().unwrap();
        let entry = (buffer.to_string(), mode.to_string());
        if let Some(pos) = state.minor_modes.iter().position(|m| *m == entry) {
            state.minor_modes.remove(pos);
        } else {
            state.minor_modes.push(entry);
        }
        Ok(())
    }

    fn create_buffer(&self, name: &str) -> EditorResult<Arc<dyn Buffer>> {
        if self.find_buffer(name).is_some() {
            return Err(EditorError::BufferExists(name.to_string()));
        }
        let buffer: Arc<dyn Buffer> = Arc::new(StubBuffer::new(name, "", None));
        self.state.lock().unwrap().buffers.push(buffer.clone());
        Ok(buffer)
    }

    fn find_buffer(&self, name: &str) -> Option<Arc<dyn Buffer>> {
        self.state
            .lock()
            .unwrap()
            .buffers
            .iter()
            .find(|b| b.name() == name)
            .cloned()
    }

    fn switch_to_buffer(&self, name: &str) -> EditorResult<()> {
        let buffer = self.lookup(name)?;
        self.state.lock().unwrap().current = Some(name.to_string());
        self.window.set_buffer(buffer);
        Ok(())
    }

    fn open_file(&self, path: &str) -> EditorResult<Arc<dyn Buffer>> {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let buffer: Arc<dyn Buffer> = Arc::new(StubBuffer::new(&name, "", Some(path)));
        self.state.lock().unwrap().buffers.push(buffer.clone());
        Ok(buffer)
    }

    fn save_buffer(&self, name: &str) -> EditorResult<()> {
        self.lookup(name)?;
        Ok(())
    }

    fn get_option(&self, name: &str) -> Option<Value> {
        self.option(name)
    }

    fn set_option(&self, name: &str, value: Value) -> EditorResult<()> {
        self.state
            .lock()
            .unwrap()
            .options
            .insert(name.to_string(), value);
        Ok(())
    }

    fn current_buffer(&self) -> Option<Arc<dyn Buffer>> {
        let current = self.state.lock().unwrap().current.clone()?;
        self.find_buffer(&current)
    }

    fn current_window(&self) -> Option<Arc<dyn Window>> {
        Some(self.window.clone())
    }
}

// ---------------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------------

type Launch = Arc<dyn Fn(DuplexStream, HandshakeConfig) + Send + Sync>;

/// Serves registered plugins over in-memory pipes
#[derive(Default)]
pub struct InProcessTransport {
    launchers: Mutex<HashMap<String, Launch>>,
    /// Relay between host and plugin ends, per plugin
    relays: Mutex<HashMap<String, JoinHandle<()>>>,
    opened: Mutex<Vec<(String, PathBuf)>>,
    /// Opens left that exit before the handshake, per plugin
    exits: Mutex<HashMap<String, usize>>,
}

impl InProcessTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve a fresh `factory()` plugin on every open
    pub fn register<P, F>(&self, name: &str, factory: F)
    where
        P: Plugin,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let launch: Launch = Arc::new(move |stream, handshake| {
            let plugin = factory();
            tokio::spawn(async move {
                let (reader, writer) = tokio::io::split(stream);
                let _ = gmacs_plugin_sdk::serve_connection(plugin, reader, writer, &handshake).await;
            });
        });
        self.launchers.lock().unwrap().insert(name.to_string(), launch);
    }

    /// Hand the plugin end of the pipe to `run` as is, for misbehaving plugins
    pub fn register_raw<F, Fut>(&self, name: &str, run: F)
    where
        F: Fn(DuplexStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let launch: Launch = Arc::new(move |stream, _| {
            tokio::spawn(run(stream));
        });
        self.launchers.lock().unwrap().insert(name.to_string(), launch);
    }

    /// Cut the pipe, as if the plugin process died
    pub fn kill(&self, name: &str) {
        if let Some(relay) = self.relays.lock().unwrap().remove(name) {
            relay.abort();
        }
    }

    /// Make the next `count` opens of `name` exit before the handshake, as a
    /// corrupt binary would
    pub fn exit_on_next_opens(&self, name: &str, count: usize) {
        self.exits.lock().unwrap().insert(name.to_string(), count);
    }

    /// Binaries opened so far, in order
    pub fn opened(&self) -> Vec<(String, PathBuf)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn open(
        &self,
        plugin: &str,
        binary: &Path,
        handshake: &HandshakeConfig,
    ) -> Result<PluginChannel> {
        let launch = self
            .launchers
            .lock()
            .unwrap()
            .get(plugin)
            .cloned()
            .ok_or_else(|| HostError::Spawn(format!("{plugin}: no such binary {binary:?}")))?;
        self.opened
            .lock()
            .unwrap()
            .push((plugin.to_string(), binary.to_path_buf()));

        let exits = match self.exits.lock().unwrap().get_mut(plugin) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };

        let (host_side, mut relay_host) = tokio::io::duplex(256 * 1024);
        let (mut relay_plugin, plugin_side) = tokio::io::duplex(256 * 1024);
        if exits {
            drop(plugin_side);
        } else {
            launch(plugin_side, handshake.clone());
        }
        let relay = tokio::spawn(async move {
            let _ = tokio::io::copy_bidirectional(&mut relay_host, &mut relay_plugin).await;
        });
        if let Some(old) = self.relays.lock().unwrap().insert(plugin.to_string(), relay) {
            old.abort();
        }

        let (reader, writer) = tokio::io::split(host_side);
        Ok(PluginChannel {
            reader: Box::new(tokio::io::BufReader::new(reader)),
            writer: Box::new(writer),
            process: None,
        })
    }
}

/// Raw plugin that announces a bogus hello line
pub async fn garbage_hello(mut stream: DuplexStream) {
    let _ = stream.write_all(b"this is not a handshake\n").await;
    let _ = stream.flush().await;
    tokio::time::sleep(Duration::from_secs(5)).await;
}

/// Raw plugin that exits before the handshake
pub async fn exits_immediately(stream: DuplexStream) {
    drop(stream);
}

// ---------------------------------------------------------------------------
// Build collaborator
// ---------------------------------------------------------------------------

/// Builder writing a placeholder binary and counting builds
#[derive(Default)]
pub struct CountingBuilder {
    pub builds: AtomicUsize,
    pub hash: Mutex<String>,
}

impl CountingBuilder {
    pub fn new(hash: &str) -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
            hash: Mutex::new(hash.to_string()),
        })
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginBuilder for CountingBuilder {
    async fn source_hash(&self, _spec: &BuildSpec) -> anyhow::Result<String> {
        Ok(self.hash.lock().unwrap().clone())
    }

    async fn build(&self, _spec: &BuildSpec, out_dir: &Path) -> anyhow::Result<PathBuf> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(out_dir).await?;
        let binary = out_dir.join("plugin");
        tokio::fs::write(&binary, b"#!/bin/sh\n").await?;
        Ok(binary)
    }
}

// ---------------------------------------------------------------------------
// Scriptable test plugin
// ---------------------------------------------------------------------------

pub type CommandFuture = Pin<Box<dyn Future<Output = gmacs_plugin_sdk::Result<()>> + Send>>;
pub type Action = Arc<dyn Fn(HostClient, Vec<Value>) -> CommandFuture + Send + Sync>;

/// Description of a scriptable plugin; cheap to clone per launch
#[derive(Clone, Default)]
pub struct ScriptSpec {
    pub name: String,
    pub commands: Vec<(String, Action)>,
    /// Events subscribed to during initialize
    pub hooks: Vec<String>,
    pub fail_hooks: bool,
    /// `event:arg0` for every hook received
    pub hook_log: Arc<Mutex<Vec<String>>>,
    /// While set, initialize sleeps past any sensible timeout
    pub slow_init: Arc<AtomicBool>,
    pub major_modes: Vec<MajorModeSpec>,
    pub key_bindings: Vec<KeyBindingSpec>,
}

impl ScriptSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn command<F, Fut>(mut self, name: &str, action: F) -> Self
    where
        F: Fn(HostClient, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = gmacs_plugin_sdk::Result<()>> + Send + 'static,
    {
        let action: Action = Arc::new(move |host, args| Box::pin(action(host, args)));
        self.commands.push((name.to_string(), action));
        self
    }

    pub fn hook(mut self, event: &str) -> Self {
        self.hooks.push(event.to_string());
        self
    }

    pub fn failing_hooks(mut self) -> Self {
        self.fail_hooks = true;
        self
    }

    pub fn major_mode(mut self, name: &str, extension: &str) -> Self {
        self.major_modes.push(MajorModeSpec {
            name: name.to_string(),
            extensions: vec![extension.to_string()],
            ..Default::default()
        });
        self
    }

    pub fn binding(mut self, binding: KeyBindingSpec) -> Self {
        self.key_bindings.push(binding);
        self
    }

    pub fn build(&self) -> ScriptedPlugin {
        ScriptedPlugin {
            spec: self.clone(),
            host: OnceLock::new(),
            events: Mutex::new(Vec::new()),
        }
    }
}

pub struct ScriptedPlugin {
    spec: ScriptSpec,
    host: OnceLock<HostClient>,
    /// Mode events as `event:buffer-name`
    events: Mutex<Vec<String>>,
}

impl ScriptedPlugin {
    fn host(&self) -> gmacs_plugin_sdk::Result<HostClient> {
        self.host.get().cloned().ok_or(PluginError::NotInitialized)
    }

    async fn log_mode_event(&self, event: &str, buffer: &BufferHandle) -> gmacs_plugin_sdk::Result<()> {
        let name = buffer.name().await?;
        self.events.lock().unwrap().push(format!("{event}:{name}"));
        self.host()?.set_status(format!("{event}:{name}")).await
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    async fn initialize(&self, _ctx: InitContext, host: HostClient) -> gmacs_plugin_sdk::Result<()> {
        if self.spec.slow_init.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        for event in &self.spec.hooks {
            host.add_hook(event.clone()).await?;
        }
        let _ = self.host.set(host);
        Ok(())
    }

    fn commands(&self) -> Vec<CommandSpec> {
        self.spec
            .commands
            .iter()
            .map(|(name, _)| CommandSpec {
                name: name.clone(),
                interactive: true,
                ..Default::default()
            })
            .collect()
    }

    fn major_modes(&self) -> Vec<MajorModeSpec> {
        self.spec.major_modes.clone()
    }

    fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        self.spec.key_bindings.clone()
    }

    async fn handle_hook(&self, event: &str, args: Vec<Value>) -> gmacs_plugin_sdk::Result<()> {
        if self.spec.fail_hooks {
            return Err(PluginError::failed(format!("{} refuses {event}", self.spec.name)));
        }
        let first = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.spec.hook_log.lock().unwrap().push(format!("{event}:{first}"));
        Ok(())
    }

    fn as_command(&self) -> Option<&dyn CommandPlugin> {
        Some(self)
    }

    fn as_major_mode(&self) -> Option<&dyn MajorModePlugin> {
        if self.spec.major_modes.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

#[async_trait]
impl CommandPlugin for ScriptedPlugin {
    async fn execute_command(&self, name: &str, args: Vec<Value>) -> gmacs_plugin_sdk::Result<()> {
        let action = self
            .spec
            .commands
            .iter()
            .find(|(command, _)| command == name)
            .map(|(_, action)| action.clone())
            .ok_or_else(|| PluginError::unsupported(format!("command '{name}'")))?;
        action(self.host()?, args).await
    }
}

#[async_trait]
impl MajorModePlugin for ScriptedPlugin {
    async fn on_activate(&self, buffer: BufferHandle) -> gmacs_plugin_sdk::Result<()> {
        self.log_mode_event("activate", &buffer).await
    }

    async fn on_deactivate(&self, buffer: BufferHandle) -> gmacs_plugin_sdk::Result<()> {
        self.log_mode_event("deactivate", &buffer).await
    }

    async fn on_file_open(&self, buffer: BufferHandle, filename: &str) -> gmacs_plugin_sdk::Result<()> {
        self.host()?.set_major_mode(&buffer.name().await?, &self.spec.major_modes[0].name).await?;
        self.host()?.set_status(format!("opened:{filename}")).await
    }
}

// ---------------------------------------------------------------------------
// Manager setup
// ---------------------------------------------------------------------------

/// Short timeouts so failure paths finish quickly
pub fn test_config(cache: &Path) -> HostConfig {
    let mut config = HostConfig::default();
    config.host_version = "1.2.0".into();
    config.timeouts.handshake_ms = 1_000;
    config.timeouts.call_ms = 500;
    config.timeouts.metadata_ms = 500;
    config.timeouts.cleanup_grace_ms = 200;
    config.cache.directory = Some(cache.to_path_buf());
    config
}

pub struct Harness {
    pub manager: PluginManager,
    pub editor: Arc<StubEditor>,
    pub transport: Arc<InProcessTransport>,
    pub cache_dir: tempfile::TempDir,
    pub bin_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut HostConfig)) -> Self {
        Self::build(adjust, None)
    }

    pub fn with_builder(builder: Arc<dyn PluginBuilder>) -> Self {
        Self::build(|_| {}, Some(builder))
    }

    fn build(adjust: impl FnOnce(&mut HostConfig), builder: Option<Arc<dyn PluginBuilder>>) -> Self {
        let cache_dir = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        let mut config = test_config(cache_dir.path());
        adjust(&mut config);

        let editor = StubEditor::new();
        let transport = InProcessTransport::new();
        let cache = BuildCache::open(cache_dir.path()).unwrap();
        let mut builder_chain = PluginManager::builder(config, editor.clone())
            .with_transport(transport.clone())
            .with_cache(cache);
        if let Some(builder) = builder {
            builder_chain = builder_chain.with_builder(builder);
        }
        let manager = builder_chain.build().unwrap();

        Self {
            manager,
            editor,
            transport,
            cache_dir,
            bin_dir,
        }
    }

    /// Placeholder prebuilt binary for `name`
    pub fn binary(&self, name: &str) -> PathBuf {
        let path = self.bin_dir.path().join(name);
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        path
    }

    /// Prebuilt source for `name`
    pub fn prebuilt(&self, name: &str) -> gmacs_plugin_host::PluginSource {
        gmacs_plugin_host::PluginSource::Binary(self.binary(name))
    }

    /// Register a prebuilt plugin served by `factory`
    pub async fn add<P, F>(&self, name: &str, factory: F)
    where
        P: Plugin,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.transport.register(name, factory);
        self.manager
            .register(name, self.prebuilt(name), None)
            .await
            .unwrap();
    }

    pub async fn add_scripted(&self, spec: ScriptSpec) {
        let name = spec.name.clone();
        self.add(&name, move || spec.build()).await;
    }

    /// Poll until `name` reaches `state` or two seconds pass
    pub async fn wait_for_state(&self, name: &str, state: PluginState) -> bool {
        for _ in 0..100 {
            if self.manager.state(name).await == Some(state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}
