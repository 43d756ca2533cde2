//! Word counting plugin for gmacs
//!
//! Contributes the `word-count-buffer` command, bound to `C-c w`, and the
//! `word-count-mode` minor mode, which keeps the status line updated with
//! the buffer's word count as it is edited.

use gmacs_plugin_sdk::prelude::*;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};
use tracing::debug;

pub const COUNT_COMMAND: &str = "word-count-buffer";
pub const COUNT_MODE: &str = "word-count-mode";
pub const BUFFER_CHANGE: &str = "buffer-change";

const DEFAULT_LABEL: &str = "Words";

/// Number of whitespace-separated words in `text`
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Default)]
pub struct WordCount {
    host: OnceLock<HostClient>,
    /// Prefix of the status message, from the `label` setting
    label: OnceLock<String>,
    /// Buffers with the minor mode on
    enabled: Mutex<HashSet<HandleId>>,
}

impl WordCount {
    pub fn new() -> Self {
        Self::default()
    }

    fn host(&self) -> Result<&HostClient> {
        self.host.get().ok_or(PluginError::NotInitialized)
    }

    fn label(&self) -> &str {
        self.label.get().map(String::as_str).unwrap_or(DEFAULT_LABEL)
    }

    fn enabled(&self) -> std::sync::MutexGuard<'_, HashSet<HandleId>> {
        self.enabled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn report(&self, buffer: &BufferHandle) -> Result<()> {
        let words = count_words(&buffer.content().await?);
        debug!(buffer = %buffer.id(), words, "counted");
        self.host()?
            .set_status(format!("{}: {words}", self.label()))
            .await
    }
}

#[async_trait]
impl Plugin for WordCount {
    fn name(&self) -> &str {
        "word-count"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Counts the words in a buffer"
    }

    async fn initialize(&self, ctx: InitContext, host: HostClient) -> Result<()> {
        if let Some(label) = ctx.config_value::<String>("label") {
            let _ = self.label.set(label);
        }
        self.host
            .set(host)
            .map_err(|_| PluginError::AlreadyInitialized)
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec {
            name: COUNT_COMMAND.into(),
            description: "Show the number of words in the current buffer".into(),
            interactive: true,
            handler: "count".into(),
            arg_prompts: Vec::new(),
        }]
    }

    fn minor_modes(&self) -> Vec<MinorModeSpec> {
        vec![MinorModeSpec {
            name: COUNT_MODE.into(),
            description: "Live word count in the status line".into(),
            global: false,
            key_bindings: Vec::new(),
        }]
    }

    fn key_bindings(&self) -> Vec<KeyBindingSpec> {
        vec![KeyBindingSpec::global("C-c w", COUNT_COMMAND)]
    }

    fn as_command(&self) -> Option<&dyn CommandPlugin> {
        Some(self)
    }

    fn as_minor_mode(&self) -> Option<&dyn MinorModePlugin> {
        Some(self)
    }
}

#[async_trait]
impl CommandPlugin for WordCount {
    async fn execute_command(&self, name: &str, _args: Vec<Value>) -> Result<()> {
        if name != COUNT_COMMAND {
            return Err(PluginError::unsupported(format!("command '{name}'")));
        }
        let host = self.host()?;
        match host.current_buffer().await? {
            Some(buffer) => self.report(&buffer).await,
            None => host.show_message("No current buffer").await,
        }
    }
}

#[async_trait]
impl MinorModePlugin for WordCount {
    async fn enable(&self, buffer: BufferHandle) -> Result<()> {
        self.host()?.add_hook(BUFFER_CHANGE).await?;
        self.enabled().insert(buffer.id());
        self.report(&buffer).await
    }

    async fn disable(&self, buffer: BufferHandle) -> Result<()> {
        self.enabled().remove(&buffer.id());
        Ok(())
    }

    async fn is_enabled(&self, buffer: BufferHandle) -> Result<bool> {
        Ok(self.enabled().contains(&buffer.id()))
    }

    async fn on_buffer_change(&self, buffer: BufferHandle, _change: ChangeSpec) -> Result<()> {
        let tracked = self.enabled().contains(&buffer.id());
        if tracked {
            self.report(&buffer).await?;
        }
        Ok(())
    }
}
